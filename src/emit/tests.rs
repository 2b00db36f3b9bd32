use std::collections::HashSet;

fn compile(source: &str) -> String {
    crate::compile(source, "test.p").expect("compilation should succeed")
}

fn index_of(asm: &str, needle: &str) -> usize {
    asm.find(needle)
        .unwrap_or_else(|| panic!("missing '{}' in:\n{}", needle, asm))
}

fn defined_labels(asm: &str) -> Vec<String> {
    asm.lines()
        .filter_map(|line| {
            let line = line.trim_end();
            let name = line.strip_suffix(':')?;
            let digits = name.strip_prefix('L')?;
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                Some(name.to_string())
            } else {
                None
            }
        })
        .collect()
}

fn referenced_labels(asm: &str) -> Vec<String> {
    asm.lines()
        .filter_map(|line| {
            let line = line.trim();
            if !(line.starts_with("beq ") || line.starts_with("bge ") || line.starts_with("j ")) {
                return None;
            }
            let last = line.split_whitespace().last()?;
            let digits = last.strip_prefix('L')?;
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                Some(last.to_string())
            } else {
                None
            }
        })
        .collect()
}

#[test]
fn test_constant_print_program() {
    let asm = compile("program demo;\nbegin\n    print 42;\nend.");
    assert_eq!(
        asm,
        "\
.file \"test.p\"
.option nopic
.section .text
.align 2
.globl main
.type main, @function
main:
  addi sp, sp, -128
  sw ra, 124(sp)
  sw s0, 120(sp)
  addi s0, sp, 128
  li t0, 42
  addi sp, sp, -4
  sw t0, 0(sp)
  lw a0, 0(sp)
  addi sp, sp, 4
  jal ra, printInt
  lw ra, 124(sp)
  lw s0, 120(sp)
  addi sp, sp, 128
  jr ra
.size main, .-main
"
    );
}

#[test]
fn test_file_prologue() {
    let asm = compile("program demo;\nbegin\nend.");
    assert!(asm.starts_with(".file \"test.p\"\n.option nopic\n"));
}

#[test]
fn test_global_variable_comm() {
    let asm = compile("program demo;\nvar x: integer;\nbegin\nend.");
    assert!(asm.contains(".comm x, 4, 4"));
}

#[test]
fn test_global_constant_rodata() {
    let asm = compile("program demo;\nvar x: integer := 7;\nbegin\nend.");
    assert!(asm.contains(
        "\
.section .rodata
.align 2
.globl x
.type x, @object
x:
.word 7
"
    ));
}

#[test]
fn test_global_boolean_constant_is_word_sized() {
    let asm = compile("program demo;\nvar flag: boolean := true;\nbegin\nend.");
    assert!(asm.contains("flag:\n.word 1"));
}

#[test]
fn test_negative_global_constant() {
    let asm = compile("program demo;\nvar x: integer := -3;\nbegin\nend.");
    assert!(asm.contains(".word -3"));
}

#[test]
fn test_assignment_sequence() {
    let asm = compile("program demo;\nbegin\n    var x: integer;\n    x := 1 + 2;\nend.");
    assert!(asm.contains(
        "\
  addi t0, s0, -12
  addi sp, sp, -4
  sw t0, 0(sp)
  li t0, 1
  addi sp, sp, -4
  sw t0, 0(sp)
  li t0, 2
  addi sp, sp, -4
  sw t0, 0(sp)
  lw t0, 0(sp)
  addi sp, sp, 4
  lw t1, 0(sp)
  addi sp, sp, 4
  add t0, t1, t0
  addi sp, sp, -4
  sw t0, 0(sp)
  lw t0, 0(sp)
  addi sp, sp, 4
  lw t1, 0(sp)
  addi sp, sp, 4
  sw t0, 0(t1)
"
    ));
}

#[test]
fn test_if_else_label_ordering() {
    let asm = compile(
        "program demo;\nvar c: boolean;\nbegin\n    if c then\n    begin\n        print 1;\n    end\n    else\n    begin\n        print 2;\n    end\nend.",
    );
    let branch = index_of(&asm, "beq t0, zero, L1");
    let jump = index_of(&asm, "j L2");
    let false_label = index_of(&asm, "L1:");
    let end_label = index_of(&asm, "L2:");
    assert!(branch < jump);
    assert!(jump < false_label);
    assert!(false_label < end_label);
}

#[test]
fn test_if_without_else_places_single_label() {
    let asm = compile(
        "program demo;\nvar c: boolean;\nbegin\n    if c then\n    begin\n        print 1;\n    end\nend.",
    );
    assert!(asm.contains("beq t0, zero, L1"));
    assert!(asm.contains("L1:"));
    assert!(!asm.contains("L2:"));
}

#[test]
fn test_while_loop_shape() {
    let asm = compile(
        "program demo;\nvar c: boolean;\nbegin\n    while c do\n    begin\n        print 1;\n    end\nend.",
    );
    let head = index_of(&asm, "L1:");
    let branch = index_of(&asm, "beq t0, zero, L2");
    let back_jump = index_of(&asm, "j L1");
    let exit = index_of(&asm, "L2:");
    assert!(head < branch);
    assert!(branch < back_jump);
    assert!(back_jump < exit);
}

#[test]
fn test_for_loop_shape() {
    let asm = compile(
        "program demo;\nbegin\n    for i := 0 to 3 do\n    begin\n        print i;\n    end\nend.",
    );
    // Initializer: address push, bound expression, store.
    let init = index_of(
        &asm,
        "\
  addi t0, s0, -12
  addi sp, sp, -4
  sw t0, 0(sp)
  li t0, 0
",
    );
    let head = index_of(&asm, "L1:");
    let compare = index_of(&asm, "bge t1, t0, L2");
    let bound = index_of(&asm, "li t0, 3");
    let back_jump = index_of(&asm, "j L1");
    let exit = index_of(&asm, "L2:");
    assert!(init < head);
    assert!(head < bound);
    assert!(bound < compare);
    assert!(compare < back_jump);
    assert!(back_jump < exit);
    // Inlined increment through the stack machine.
    assert!(asm.contains(
        "\
  addi t0, s0, -12
  addi sp, sp, -4
  sw t0, 0(sp)
  lw t0, -12(s0)
  addi sp, sp, -4
  sw t0, 0(sp)
  li t0, 1
  addi sp, sp, -4
  sw t0, 0(sp)
  lw t0, 0(sp)
  addi sp, sp, 4
  lw t1, 0(sp)
  addi sp, sp, 4
  add t0, t1, t0
  addi sp, sp, -4
  sw t0, 0(sp)
  lw t0, 0(sp)
  addi sp, sp, 4
  lw t1, 0(sp)
  addi sp, sp, 4
  sw t0, 0(t1)
"
    ));
}

#[test]
fn test_parameter_homing_offsets() {
    let asm = compile(
        "program demo;\nfunction f(a, b, c: integer): integer;\nbegin\n    return a;\nend;\nbegin\n    print f(1, 2, 3);\nend.",
    );
    let a = index_of(&asm, "sw a0, -12(s0)");
    let b = index_of(&asm, "sw a1, -16(s0)");
    let c = index_of(&asm, "sw a2, -20(s0)");
    assert!(a < b);
    assert!(b < c);
}

#[test]
fn test_parameters_past_eight_use_saved_registers() {
    let asm = compile(
        "program demo;\nfunction f(p0, p1, p2, p3, p4, p5, p6, p7, p8, p9: integer): integer;\nbegin\n    return p0;\nend;\nbegin\n    print f(1, 2, 3, 4, 5, 6, 7, 8, 9, 10);\nend.",
    );
    // Homing continues into s8/s9 after a7.
    assert!(asm.contains("sw a7, -40(s0)"));
    assert!(asm.contains("sw s8, -44(s0)"));
    assert!(asm.contains("sw s9, -48(s0)"));
    // Arguments pop in reverse index order, so a0 is loaded last.
    let s9 = index_of(&asm, "lw s9, 0(sp)");
    let s8 = index_of(&asm, "lw s8, 0(sp)");
    let a7 = index_of(&asm, "lw a7, 0(sp)");
    let a0 = index_of(&asm, "lw a0, 0(sp)");
    let call = index_of(&asm, "jal ra, f");
    assert!(s9 < s8);
    assert!(s8 < a7);
    assert!(a7 < a0);
    assert!(a0 < call);
}

#[test]
fn test_call_argument_evaluation_order() {
    let asm = compile(
        "program demo;\nfunction f(a, b: integer): integer;\nbegin\n    return a;\nend;\nbegin\n    print f(1, 2);\nend.",
    );
    let first = index_of(&asm, "li t0, 1");
    let second = index_of(&asm, "li t0, 2");
    let pop_b = index_of(&asm, "lw a1, 0(sp)");
    let pop_a = index_of(&asm, "lw a0, 0(sp)");
    assert!(first < second);
    assert!(second < pop_b);
    assert!(pop_b < pop_a);
}

#[test]
fn test_call_statement_pops_result_word() {
    let asm = compile(
        "program demo;\nfunction p();\nbegin\n    print 1;\nend;\nbegin\n    p();\nend.",
    );
    assert!(asm.contains(
        "\
  jal ra, p
  mv t0, a0
  addi sp, sp, -4
  sw t0, 0(sp)
  addi sp, sp, 4
"
    ));
}

#[test]
fn test_call_expression_keeps_result_word() {
    let asm = compile(
        "program demo;\nfunction f(): integer;\nbegin\n    return 1;\nend;\nbegin\n    var x: integer;\n    x := f();\nend.",
    );
    assert!(asm.contains(
        "\
  jal ra, f
  mv t0, a0
  addi sp, sp, -4
  sw t0, 0(sp)
  lw t0, 0(sp)
  addi sp, sp, 4
  lw t1, 0(sp)
  addi sp, sp, 4
  sw t0, 0(t1)
"
    ));
}

#[test]
fn test_comparison_encodings() {
    let asm = compile(
        "program demo;\nvar a, b: integer;\nbegin\n    print a < b;\n    print a <= b;\n    print a > b;\n    print a >= b;\nend.",
    );
    // < : lhs in t1, rhs in t0
    assert!(asm.contains("  slt t0, t1, t0\n  addi sp, sp, -4"));
    // <= : negated >
    assert!(asm.contains("  slt t0, t0, t1\n  xori t0, t0, 1\n"));
    // >= : negated <
    assert!(asm.contains("  slt t0, t1, t0\n  xori t0, t0, 1\n"));
}

#[test]
fn test_equality_encodings() {
    let eq = compile("program demo;\nvar a, b: integer;\nbegin\n    print a = b;\nend.");
    assert!(eq.contains(
        "\
  slt t2, t1, t0
  slt t3, t0, t1
  or t0, t2, t3
  xori t0, t0, 1
"
    ));
    let ne = compile("program demo;\nvar a, b: integer;\nbegin\n    print a <> b;\nend.");
    assert!(ne.contains(
        "\
  slt t2, t1, t0
  slt t3, t0, t1
  or t0, t2, t3
  addi sp, sp, -4
"
    ));
}

#[test]
fn test_arithmetic_and_logical_encodings() {
    let asm = compile(
        "program demo;\nvar a, b: integer;\nvar p, q: boolean;\nbegin\n    print a + b;\n    print a - b;\n    print a * b;\n    print a / b;\n    print a mod b;\n    print p and q;\n    print p or q;\nend.",
    );
    assert!(asm.contains("add t0, t1, t0"));
    assert!(asm.contains("sub t0, t1, t0"));
    assert!(asm.contains("mul t0, t1, t0"));
    assert!(asm.contains("div t0, t1, t0"));
    assert!(asm.contains("rem t0, t1, t0"));
    assert!(asm.contains("and t0, t1, t0"));
    assert!(asm.contains("or t0, t1, t0"));
}

#[test]
fn test_unary_encodings() {
    let asm = compile(
        "program demo;\nvar a: integer;\nvar p: boolean;\nbegin\n    print -a;\n    print not p;\nend.",
    );
    assert!(asm.contains("sub t0, zero, t0"));
    assert!(asm.contains("xori t0, t0, 1"));
}

#[test]
fn test_boolean_literals_are_one_and_zero() {
    let asm = compile("program demo;\nbegin\n    print true;\n    print false;\nend.");
    assert!(asm.contains("li t0, 1"));
    assert!(asm.contains("li t0, 0"));
}

#[test]
fn test_global_rvalue_load() {
    let asm = compile("program demo;\nvar g: integer;\nbegin\n    print g;\nend.");
    assert!(asm.contains(
        "\
  la t0, g
  lw t0, 0(t0)
  addi sp, sp, -4
  sw t0, 0(sp)
"
    ));
}

#[test]
fn test_global_lvalue_address() {
    let asm = compile("program demo;\nvar g: integer;\nbegin\n    g := 5;\nend.");
    assert!(asm.contains(
        "\
  la t0, g
  addi sp, sp, -4
  sw t0, 0(sp)
  li t0, 5
"
    ));
}

#[test]
fn test_read_local() {
    let asm = compile("program demo;\nbegin\n    var x: integer;\n    read x;\nend.");
    assert!(asm.contains(
        "\
  addi t0, s0, -12
  addi sp, sp, -4
  sw t0, 0(sp)
  jal ra, readInt
  lw t0, 0(sp)
  addi sp, sp, 4
  sw a0, 0(t0)
"
    ));
}

#[test]
fn test_local_constant_initializer() {
    let asm = compile("program demo;\nbegin\n    var k: integer := 7;\n    print k;\nend.");
    assert!(asm.contains("  li t0, 7\n  sw t0, -12(s0)\n"));
    assert!(asm.contains("lw t0, -12(s0)"));
}

#[test]
fn test_return_moves_result_to_a0() {
    let asm = compile(
        "program demo;\nfunction one(): integer;\nbegin\n    return 1;\nend;\nbegin\n    print one();\nend.",
    );
    let ret = index_of(&asm, "mv a0, t0");
    let epilogue = index_of(&asm, "lw ra, 124(sp)");
    assert!(ret < epilogue);
    assert!(asm.contains(".size one, .-one"));
}

#[test]
fn test_function_section_directives() {
    let asm = compile(
        "program demo;\nfunction f(): integer;\nbegin\n    return 1;\nend;\nbegin\nend.",
    );
    assert!(asm.contains(
        "\
.section .text
.align 2
.globl f
.type f, @function
f:
  addi sp, sp, -128
  sw ra, 124(sp)
  sw s0, 120(sp)
  addi s0, sp, 128
"
    ));
}

#[test]
fn test_empty_procedure_still_framed() {
    let asm =
        compile("program demo;\nfunction nop();\nbegin\nend;\nbegin\n    nop();\nend.");
    assert!(asm.contains(
        "\
nop:
  addi sp, sp, -128
  sw ra, 124(sp)
  sw s0, 120(sp)
  addi s0, sp, 128
  lw ra, 124(sp)
"
    ));
}

#[test]
fn test_offset_consistency() {
    let asm = compile(
        "program demo;\nbegin\n    var x: integer;\n    x := 1;\n    print x;\n    read x;\nend.",
    );
    for line in asm.lines() {
        let line = line.trim();
        if line.contains("(s0)") {
            assert!(
                line.contains("-12(s0)"),
                "reference to x uses a foreign offset: {}",
                line
            );
        }
        if let Some(rest) = line.strip_prefix("addi t0, s0, ") {
            assert_eq!(rest, "-12", "address of x uses a foreign offset: {}", line);
        }
    }
}

#[test]
fn test_mode_resets_between_references() {
    // LHS is an address push, RHS in the very next reference is a value load.
    let asm = compile(
        "program demo;\nbegin\n    var x: integer;\n    var y: integer;\n    x := y;\nend.",
    );
    assert!(asm.contains(
        "\
  addi t0, s0, -12
  addi sp, sp, -4
  sw t0, 0(sp)
  lw t0, -16(s0)
"
    ));
}

#[test]
fn test_shadowed_local_gets_its_own_slot() {
    let asm = compile(
        "program demo;\nbegin\n    var x: integer;\n    x := 1;\n    begin\n        var x: integer;\n        x := 2;\n        print x;\n    end\n    print x;\nend.",
    );
    // Inner x lives at -16 and is the one printed inside the block.
    assert!(asm.contains("lw t0, -16(s0)"));
    let inner_print = index_of(&asm, "lw t0, -16(s0)");
    let outer_print = asm.rfind("lw t0, -12(s0)").expect("outer x load");
    assert!(inner_print < outer_print);
}

#[test]
fn test_shadowed_param_resolves_before_global() {
    // A parameter shadowing a global is only a warning, so the program must
    // reach codegen with the inner binding winning inside the function and
    // the global winning in the program body.
    let asm = compile(
        "program demo;\nvar g: integer;\nfunction bump(g: integer): integer;\nbegin\n    return g + 1;\nend;\nbegin\n    read g;\n    print bump(g);\nend.",
    );
    let func_start = index_of(&asm, "bump:");
    let main_start = index_of(&asm, "main:");
    let func_section = &asm[func_start..main_start];
    let main_section = &asm[main_start..];

    assert!(
        func_section.contains("lw t0, -12(s0)"),
        "param g should load from its slot:\n{}",
        func_section
    );
    assert!(
        !func_section.contains("la t0, g"),
        "function body must not reach the global g:\n{}",
        func_section
    );
    assert!(
        main_section.contains("la t0, g"),
        "program body should address the global g:\n{}",
        main_section
    );
}

#[test]
fn test_shadowed_loop_var_resolves_inside_loop_only() {
    let asm = compile(
        "program demo;\nbegin\n    var i: integer;\n    i := 7;\n    for i := 0 to 2 do\n    begin\n        print i;\n    end\n    print i;\nend.",
    );
    // The loop variable gets its own slot at -16; the outer i stays at -12.
    assert!(asm.contains("lw t0, -16(s0)"));
    let exit_label = index_of(&asm, "L2:");
    let final_print = asm.rfind("lw t0, -12(s0)").expect("outer i load");
    assert!(
        exit_label < final_print,
        "outer i must resolve again after the loop:\n{}",
        asm
    );
}

#[test]
fn test_label_counter_spans_functions() {
    let asm = compile(
        "program demo;\nvar c: boolean;\nfunction f(): integer;\nbegin\n    if c then\n    begin\n        return 1;\n    end\n    return 0;\nend;\nbegin\n    while c do\n    begin\n        print f();\n    end\nend.",
    );
    // The function consumed L1; main's while must continue at L2/L3.
    assert_eq!(asm.matches("L1:").count(), 1);
    assert!(asm.contains("beq t0, zero, L1"));
    assert!(asm.contains("L2:"));
    assert!(asm.contains("j L2"));
    assert!(asm.contains("L3:"));
}

#[test]
fn test_label_uniqueness_and_closure() {
    let asm = compile(
        "program demo;\nvar c: boolean;\nfunction f(n: integer): integer;\nbegin\n    if n < 10 then\n    begin\n        return n;\n    end\n    else\n    begin\n        return 10;\n    end\nend;\nbegin\n    while c do\n    begin\n        for i := 0 to 3 do\n        begin\n            if c then\n            begin\n                print f(i);\n            end\n        end\n    end\nend.",
    );
    let defined = defined_labels(&asm);
    let referenced = referenced_labels(&asm);

    let defined_set: HashSet<&String> = defined.iter().collect();
    assert_eq!(
        defined.len(),
        defined_set.len(),
        "a label is defined twice:\n{}",
        asm
    );
    for label in &referenced {
        assert!(
            defined_set.contains(label),
            "branch to undefined label {}:\n{}",
            label,
            asm
        );
    }
    let referenced_set: HashSet<&String> = referenced.iter().collect();
    for label in &defined {
        assert!(
            referenced_set.contains(label),
            "label {} is never referenced:\n{}",
            label,
            asm
        );
    }
}

#[test]
fn test_stack_balance_over_whole_programs() {
    let sources = [
        "program demo;\nbegin\n    print 1 + 2 * 3;\nend.",
        "program demo;\nvar g: integer;\nbegin\n    read g;\n    g := g + 1;\n    print g;\nend.",
        "program demo;\nfunction f(a, b: integer): integer;\nbegin\n    return a * b;\nend;\nbegin\n    f(1, 2);\n    print f(3, 4);\nend.",
        "program demo;\nbegin\n    for i := 0 to 3 do\n    begin\n        print i;\n    end\nend.",
    ];
    for source in sources {
        let asm = compile(source);
        let pushes = asm.matches("addi sp, sp, -4\n").count();
        let pops = asm.matches("addi sp, sp, 4\n").count();
        assert_eq!(pushes, pops, "unbalanced stack for:\n{}\n{}", source, asm);
    }
}

#[test]
fn test_globals_emitted_before_text() {
    let asm = compile("program demo;\nvar g: integer;\nvar k: integer := 2;\nbegin\nend.");
    let comm = index_of(&asm, ".comm g, 4, 4");
    let rodata = index_of(&asm, ".section .rodata");
    let text = index_of(&asm, ".section .text");
    assert!(comm < text);
    assert!(rodata < text);
}

#[test]
fn test_main_emitted_after_functions() {
    let asm = compile(
        "program demo;\nfunction f(): integer;\nbegin\n    return 1;\nend;\nbegin\n    print f();\nend.",
    );
    let func_label = index_of(&asm, "f:");
    let main_label = index_of(&asm, "main:");
    assert!(func_label < main_label);
}
