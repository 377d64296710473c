use qvm_runtime_tests::fault_tests;

fault_tests!(
    interpreted => qvm_runtime::Engine::Interpreted,
    compiled => qvm_runtime::Engine::Compiled
);
