use qvm_runtime_tests::control_tests;

control_tests!(
    interpreted => qvm_runtime::Engine::Interpreted,
    compiled => qvm_runtime::Engine::Compiled
);
