//! End-to-end compilation tests.
//!
//! Programs are written in the textual IR, compiled through the whole pipeline
//! and executed on the reference machine.

use bumpalo::Bump;
use t86_backend::core::{CompilationSession, CompilerConfig, ErrorKind};
use t86_backend::t86::Operand;
use t86_backend::ir::{FunctionBuilder, ValueId};
use t86_backend::{compile, ir, CompileError, Compiler};

const CALL_PROGRAM: &str = r#"
fn bar(%i) {
entry:
    retr %i
}

fn main() {
entry:
    %c = ldi 5
    %r = call @bar(%c)
    retr %r
}
"#;

const LOOP_PROGRAM: &str = r#"
; sum of 1..=n
fn main(%n) {
entry:
    %zero = ldi 0
    %one = ldi 1
    %acc = alloca 8
    %i = alloca 8
    st %acc, %zero
    st %i, %one
    jmp cond
cond:
    %iv = ld %i
    %c = le %iv, %n
    br %c, body, exit
body:
    %a = ld %acc
    %iv2 = ld %i
    %a2 = add %a, %iv2
    st %acc, %a2
    %one2 = ldi 1
    %inc = add %iv2, %one2
    st %i, %inc
    jmp cond
exit:
    %r = ld %acc
    retr %r
}
"#;

const FACTORIAL_PROGRAM: &str = r#"
fn main(%x) {
entry:
    %r = call @fact(%x)
    retr %r
}

fn fact(%n) {
entry:
    %one = ldi 1
    %c = le %n, %one
    br %c, base, rec
base:
    retr %one
rec:
    %one2 = ldi 1
    %m = sub %n, %one2
    %f = call @fact(%m)
    %r = mul %n, %f
    retr %r
}
"#;

const PRESSURE_PROGRAM: &str = r#"
fn main(%x) {
entry:
    %a = ldi 1
    %b = ldi 2
    %c = ldi 3
    %d = ldi 4
    %s1 = add %a, %b
    %s2 = add %c, %d
    %s3 = add %s1, %s2
    %s4 = add %s3, %x
    %s5 = mul %s4, %a
    retr %s5
}
"#;

const COMPARE_PROGRAM: &str = r#"
; (a < b) + 1
fn main(%a, %b) {
entry:
    %c = lt %a, %b
    %one = ldi 1
    %r = add %c, %one
    retr %r
}
"#;

const DOTTED_NAME_PROGRAM: &str = r#"
fn main() {
entry:
    %r = call @main.epilogue0()
    %one = ldi 1
    %s = add %r, %one
    retr %s
}

fn main.epilogue0() {
entry:
    %c = ldi 7
    retr %c
}
"#;

fn run(source: &str, config: &CompilerConfig, args: &[i64]) -> i64 {
    let program = ir::parse(source).unwrap();
    let assembled = compile(&program, config).unwrap();
    assembled.run(args).unwrap()
}

#[test]
fn test_call_returns_argument() {
    let _ = env_logger::builder().is_test(true).try_init();

    assert_eq!(run(CALL_PROGRAM, &CompilerConfig::default(), &[]), 5);
    println!("✅ bar(5) == 5");
}

#[test]
fn test_recursive_function_lowered_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let source = "fn main(%x) {\nentry:\n    %r = call @main(%x)\n    retr %r\n}\n";
    let program = ir::parse(source).unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let compiler = Compiler::new(CompilerConfig::default(), &session).unwrap();
    let assembled = compiler.compile(&program).unwrap();

    let stats = session.stats();
    assert_eq!(stats.functions_lowered, 1);
    assert_eq!(assembled.program.functions().len(), 1);

    let main = assembled.layout.address_of("main").unwrap();
    let call = assembled
        .program
        .instructions()
        .find(|inst| inst.is_call())
        .and_then(|inst| inst.jump_target())
        .unwrap();
    match &assembled.program.pool()[call] {
        Operand::Label(label) => assert_eq!(label.address, Some(main)),
        other => panic!("call target is {}", other),
    }
}

#[test]
fn test_loop_with_two_registers() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = CompilerConfig::new().with_registers(2);
    assert_eq!(run(LOOP_PROGRAM, &config, &[10]), 55);
    assert_eq!(run(LOOP_PROGRAM, &config, &[0]), 0);
    assert_eq!(run(LOOP_PROGRAM, &config, &[1]), 1);
}

#[test]
fn test_recursive_factorial() {
    let _ = env_logger::builder().is_test(true).try_init();

    for registers in [2, 3, 4, 16] {
        let config = CompilerConfig::new().with_registers(registers);
        assert_eq!(run(FACTORIAL_PROGRAM, &config, &[1]), 1);
        assert_eq!(run(FACTORIAL_PROGRAM, &config, &[5]), 120);
        assert_eq!(run(FACTORIAL_PROGRAM, &config, &[10]), 3_628_800);
    }
}

#[test]
fn test_register_pressure_spills() {
    let _ = env_logger::builder().is_test(true).try_init();
    let program = ir::parse(PRESSURE_PROGRAM).unwrap();

    let spills = |registers: usize| {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let compiler = Compiler::new(CompilerConfig::new().with_registers(registers), &session).unwrap();
        let assembled = compiler.compile(&program).unwrap();
        assert_eq!(assembled.run(&[5]).unwrap(), 15);
        session.stats().spills
    };

    assert!(spills(2) > 0);
    assert_eq!(spills(64), 0);
}

#[test]
fn test_materialized_comparison() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = CompilerConfig::default();
    assert_eq!(run(COMPARE_PROGRAM, &config, &[3, 5]), 2);
    assert_eq!(run(COMPARE_PROGRAM, &config, &[5, 3]), 1);
    assert_eq!(run(COMPARE_PROGRAM, &config, &[4, 4]), 1);
}

#[test]
fn test_optimizer_preserves_results() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cases: Vec<(&str, Vec<Vec<i64>>)> = vec![
        (LOOP_PROGRAM, vec![vec![0], vec![3], vec![10]]),
        (FACTORIAL_PROGRAM, vec![vec![1], vec![6]]),
        (PRESSURE_PROGRAM, vec![vec![-4], vec![9]]),
        (COMPARE_PROGRAM, vec![vec![1, 2], vec![2, 1]]),
    ];
    for (source, inputs) in &cases {
        for registers in [2, 4] {
            let optimized = CompilerConfig::new().with_registers(registers);
            let plain = optimized.clone().with_optimize(false);
            for args in inputs {
                assert_eq!(
                    run(source, &optimized, args),
                    run(source, &plain, args),
                    "args {:?} with {} registers",
                    args,
                    registers
                );
            }
        }
    }
}

#[test]
fn test_optimizer_shrinks_program() {
    let program = ir::parse(LOOP_PROGRAM).unwrap();
    let optimized = compile(&program, &CompilerConfig::default()).unwrap();
    let plain = compile(&program, &CompilerConfig::default().with_optimize(false)).unwrap();
    assert!(optimized.layout.size() < plain.layout.size());
    assert!(!optimized.program.instructions().any(|inst| inst.is_nop()));
}

#[test]
fn test_error_kinds() {
    let cases = [
        ("fn main() {\nentry:\n    %x = ldf 1.5\n    retr %x\n}\n", ErrorKind::Lowering),
        ("fn main() {\nentry:\n    %x = call @missing()\n    retr %x\n}\n", ErrorKind::Lowering),
        ("fn main() {\nentry:\n    %p = alloca 16\n    ret\n}\n", ErrorKind::Lowering),
        ("fn start() {\nentry:\n    ret\n}\n", ErrorKind::Lowering),
    ];
    for (source, kind) in cases {
        let program = ir::parse(source).unwrap();
        let err = compile(&program, &CompilerConfig::default()).unwrap_err();
        assert_eq!(err.kind(), kind, "{}", err);
    }
}

#[test]
fn test_specific_errors() {
    let program = ir::parse("fn main() {\nentry:\n    %x = ldf 1.5\n    retr %x\n}\n").unwrap();
    let err = compile(&program, &CompilerConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::NotImplemented { ref opcode, .. } if opcode == "ldf"));

    let program = ir::parse("fn main() {\nentry:\n    %x = call @missing()\n    retr %x\n}\n").unwrap();
    let err = compile(&program, &CompilerConfig::default()).unwrap_err();
    assert_eq!(err, CompileError::FunctionNotFound { name: "missing".to_string() });

    let program =
        ir::parse("fn main() {\nentry:\n    %f = ldi 0\n    %x = call %f()\n    retr %x\n}\n").unwrap();
    let err = compile(&program, &CompilerConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedCall { .. }));

    let program = ir::parse("fn main() {\nentry:\n    %p = alloca 16\n    ret\n}\n").unwrap();
    let err = compile(&program, &CompilerConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedLocalSize { size: 16, .. }));

    let program = ir::parse("fn start() {\nentry:\n    ret\n}\n").unwrap();
    let err = compile(&program, &CompilerConfig::default()).unwrap_err();
    assert_eq!(err, CompileError::MissingEntry { name: "main".to_string() });
}

fn malformed_reason(function: ir::Function) -> String {
    let mut program = ir::Program::new();
    program.add_function(function).unwrap();
    match compile(&program, &CompilerConfig::default()).unwrap_err() {
        CompileError::MalformedIr { function, reason } => {
            assert_eq!(function, "main");
            reason
        }
        other => panic!("expected malformed IR, got {}", other),
    }
}

#[test]
fn test_malformed_ir() {
    let mut f = FunctionBuilder::new("main", 0);
    f.block("entry");
    f.imm(1);
    assert_eq!(malformed_reason(f.finish()), "block `entry` is not terminated");

    let mut f = FunctionBuilder::new("main", 0);
    f.block("entry");
    f.ret();
    f.imm(1);
    assert_eq!(
        malformed_reason(f.finish()),
        "instruction after the terminator of block `entry`"
    );

    let mut f = FunctionBuilder::new("main", 0);
    f.block("entry");
    f.ret_value(ValueId(7));
    assert!(malformed_reason(f.finish()).contains("does not name a value"));

    let source = "fn g(%a) {\nentry:\n    retr %a\n}\n\nfn main() {\nentry:\n    %x = call @g()\n    retr %x\n}\n";
    let program = ir::parse(source).unwrap();
    let err = compile(&program, &CompilerConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lowering);
    assert_eq!(
        err,
        CompileError::MalformedIr {
            function: "main".to_string(),
            reason: "call to `g` passes 0 arguments, expected 1".to_string(),
        }
    );
}

#[test]
fn test_dotted_function_name_keeps_own_address() {
    let _ = env_logger::builder().is_test(true).try_init();

    for optimize in [false, true] {
        let config = CompilerConfig::default().with_optimize(optimize);
        assert_eq!(run(DOTTED_NAME_PROGRAM, &config, &[]), 8);
    }
    println!("✅ main.epilogue0 is a function, not a block");
}

#[test]
fn test_function_named_like_generated_block() {
    let mut helper = FunctionBuilder::new("main$epilogue0", 0);
    helper.block("entry");
    let seven = helper.imm(7);
    helper.ret_value(seven);

    let mut main = FunctionBuilder::new("main", 0);
    main.block("entry");
    let r = main.call("main$epilogue0", vec![]);
    main.ret_value(r);

    let mut program = ir::Program::new();
    program.add_function(main.finish()).unwrap();
    program.add_function(helper.finish()).unwrap();

    let err = compile(&program, &CompilerConfig::default().with_optimize(false)).unwrap_err();
    assert_eq!(err, CompileError::DuplicateLabel { label: "main$epilogue0".to_string() });
    assert_eq!(err.kind(), ErrorKind::Assembly);
}
