use qvm_runtime_tests::syscall_tests;

syscall_tests!(
    interpreted => qvm_runtime::Engine::Interpreted,
    compiled => qvm_runtime::Engine::Compiled
);
