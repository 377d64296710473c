use qvm_runtime_tests::arith_tests;

arith_tests!(
    interpreted => qvm_runtime::Engine::Interpreted,
    compiled => qvm_runtime::Engine::Compiled
);
