use qvm_runtime_tests::memory_tests;

memory_tests!(
    interpreted => qvm_runtime::Engine::Interpreted,
    compiled => qvm_runtime::Engine::Compiled
);
