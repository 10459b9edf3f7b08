//! End-to-end tests: compile source text, execute the emitted program on the
//! reference interpreter, and compare the character streams.

mod common;

use byteflow::{compile, compile_to_program, optimize, program, CompileError, Options};

/// Compile (unoptimized) and run against the given stdin.
fn run_source_with_input(source: &str, input: &[u8]) -> String {
  let text = compile(source, &Options::default()).expect("compilation failed");
  assert!(
    text.chars().all(|c| "+-<>[].,".contains(c)),
    "minified output strayed outside the command alphabet"
  );
  assert!(program::is_balanced(&text), "unbalanced brackets emitted");
  let output = common::run(&text, input).expect("program failed to run");
  String::from_utf8_lossy(&output).into_owned()
}

fn run_source(source: &str) -> String {
  run_source_with_input(source, b"")
}

/// Run the same program unoptimized and optimized; they must agree.
fn run_both_ways(source: &str, input: &[u8]) -> String {
  let plain = run_source_with_input(source, input);
  let optimized_text = compile(
    source,
    &Options {
      optimize: true,
      verbose: false,
    },
  )
  .expect("optimized compilation failed");
  assert!(program::is_balanced(&optimized_text));
  let optimized_output = common::run(&optimized_text, input).expect("optimized program failed");
  assert_eq!(
    plain,
    String::from_utf8_lossy(&optimized_output),
    "peephole optimization changed observable behavior"
  );
  plain
}

// ============================================================
// Core end-to-end scenarios
// ============================================================

#[test]
fn smallest_program_halts_silently() {
  assert_eq!(run_both_ways("int main() { return 0; }", b""), "");
}

#[test]
fn print_literal() {
  assert_eq!(
    run_both_ways("int main() { print(\"Hi\"); return 0; }", b""),
    "Hi"
  );
}

#[test]
fn add_and_print() {
  let source = "int main() { int a = 3; int b = 4; printint(a + b); return 0; }";
  assert_eq!(run_both_ways(source, b""), "7");
}

#[test]
fn while_loop_counts() {
  let source = "int main() { int i = 0; while (i < 5) { printint(i); i = i + 1; } return 0; }";
  assert_eq!(run_both_ways(source, b""), "01234");
}

#[test]
fn if_else_on_stdin() {
  let source = r#"
    int main() {
      int x = readint();
      if (x == 0) print("z"); else print("n");
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b"0"), "z");
  assert_eq!(run_both_ways(source, b"7"), "n");
}

#[test]
fn array_sum() {
  let source = r#"
    int main() {
      int a[3] = {1, 2, 3};
      int sum = 0;
      int i = 0;
      while (i < 3) {
        sum = sum + a[i];
        i = i + 1;
      }
      printint(sum);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "6");
}

// ============================================================
// Expressions
// ============================================================

#[test]
fn arithmetic_wraps_modulo_256() {
  assert_eq!(run_source("int main() { printint(0 - 1); return 0; }"), "255");
  assert_eq!(run_source("int main() { printint(200 + 100); return 0; }"), "44");
  assert_eq!(run_source("int main() { printint(16 * 32); return 0; }"), "0");
}

#[test]
fn division_and_remainder() {
  assert_eq!(run_source("int main() { printint(17 / 5); return 0; }"), "3");
  assert_eq!(run_source("int main() { printint(17 % 5); return 0; }"), "2");
  assert_eq!(run_source("int main() { printint(4 / 9); return 0; }"), "0");
  assert_eq!(run_source("int main() { printint(250 / 2); return 0; }"), "125");
}

#[test]
fn division_by_zero_parks_in_an_endless_loop() {
  // The emitted guard sets a sentinel and spins in a balanced loop instead
  // of dividing: the program never terminates and never prints.
  let source = "int main() { printint(1 / 0); return 0; }";
  for optimize in [false, true] {
    let text = compile(
      source,
      &Options {
        optimize,
        verbose: false,
      },
    )
    .expect("compilation failed");
    assert!(program::is_balanced(&text));
    let result = common::run_with_budget(&text, b"", 5_000_000);
    assert!(
      matches!(result, Err(common::RunError::OutOfSteps)),
      "expected the zero-divisor guard to hang, got {result:?}"
    );
  }
}

#[test]
fn comparison_table() {
  let source = r#"
    int main() {
      printint(2 < 3); printint(3 < 2); printint(3 < 3);
      printint(3 <= 3); printint(4 <= 3);
      printint(3 > 2); printint(2 > 3);
      printint(3 >= 4); printint(4 >= 4);
      printint(5 == 5); printint(5 == 6);
      printint(5 != 6); printint(6 != 6);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "1001011011010");
}

#[test]
fn logical_operators_short_circuit() {
  let source = r#"
    int noisy() { print("x"); return 1; }
    int main() {
      if (false && noisy()) print("a");
      if (true || noisy()) print("b");
      printint(true && true);
      printint(true && false);
      printint(false || false);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "b110");
}

#[test]
fn unary_operators() {
  let source = r#"
    int main() {
      printint(!0); printint(!7);
      printint(-1);
      printint(~0);
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "10255255");
}

#[test]
fn ternary_selects_one_branch() {
  let source = r#"
    int main() {
      printint(5 > 3 ? 1 : 2);
      printint(5 < 3 ? 1 : 2);
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "12");
}

#[test]
fn increment_decrement_and_compound_assignment() {
  let source = r#"
    int main() {
      int x = 10;
      x -= 3;
      x *= 2;
      printint(x);
      int y = 5;
      printint(y++);
      printint(++y);
      printint(y--);
      printint(--y);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "145775");
}

#[test]
fn char_arithmetic_and_io() {
  let source = r#"
    int main() {
      printchar('A');
      printchar('A' + 1);
      printchar(readchar());
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b"Q"), "ABQ");
}

#[test]
fn readint_reads_multi_digit_numbers() {
  let source = "int main() { printint(readint() + 1); return 0; }";
  assert_eq!(run_source_with_input(source, b"41"), "42");
  assert_eq!(run_source_with_input(source, b"199\n"), "200");
  assert_eq!(run_source_with_input(source, b""), "1");
}

#[test]
fn printint_has_no_leading_zeros() {
  let source = r#"
    int main() {
      printint(0); print(" ");
      printint(7); print(" ");
      printint(42); print(" ");
      printint(100); print(" ");
      printint(255);
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "0 7 42 100 255");
}

// ============================================================
// Statements and control flow
// ============================================================

#[test]
fn for_loop_with_declaration() {
  let source = r#"
    int main() {
      for (int i = 0; i < 4; i += 1) printint(i);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "0123");
}

#[test]
fn do_while_runs_at_least_once() {
  let source = r#"
    int main() {
      int i = 9;
      do { printint(i); i += 1; } while (i < 3);
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "9");
}

#[test]
fn break_leaves_innermost_loop() {
  let source = r#"
    int main() {
      int i = 0;
      while (true) {
        if (i == 3) { break; }
        printint(i);
        i += 1;
      }
      printint(i);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "0123");
}

#[test]
fn break_in_nested_loop_only_exits_inner() {
  let source = r#"
    int main() {
      for (int i = 0; i < 2; i += 1) {
        for (int j = 0; j < 9; j += 1) {
          if (j == 2) { break; }
          printint(j);
        }
        print(";");
      }
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "01;01;");
}

#[test]
fn break_skips_the_condition_re_evaluation() {
  let source = r#"
    int noisy() { print("n"); return 1; }
    int main() {
      while (noisy() == 1) { break; }
      do { break; } while (noisy() == 1);
      return 0;
    }
  "#;
  // The while condition runs once on entry; neither loop re-evaluates it
  // after the break.
  assert_eq!(run_both_ways(source, b""), "n");
}

#[test]
fn switch_falls_through_until_break() {
  let source = r#"
    int main() {
      switch (2) {
        case 1: print("one"); break;
        case 2: print("two");
        case 3: print("three"); break;
        default: print("none");
      }
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "twothree");
}

#[test]
fn switch_default_runs_when_nothing_matches() {
  let source = r#"
    int main() {
      switch (9) {
        case 1: print("one"); break;
        default: print("none");
      }
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "none");
}

#[test]
fn default_before_a_matching_case_does_not_fire() {
  let source = r#"
    int main() {
      switch (1) {
        default: print("d");
        case 1: print("o");
      }
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "o");
}

#[test]
fn default_before_cases_falls_through_when_nothing_matches() {
  let source = r#"
    int main() {
      switch (2) {
        default: print("d");
        case 1: print("o");
      }
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "do");
}

#[test]
fn switch_on_char_scrutinee() {
  let source = r#"
    int main() {
      switch (readchar()) {
        case 'a': print("first"); break;
        case 'b': print("second"); break;
        default: print("other");
      }
      return 0;
    }
  "#;
  assert_eq!(run_source_with_input(source, b"b"), "second");
  assert_eq!(run_source_with_input(source, b"z"), "other");
}

#[test]
fn scopes_shadow_and_restore() {
  let source = r#"
    int main() {
      int x = 1;
      {
        int x = 2;
        printint(x);
      }
      printint(x);
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "21");
}

#[test]
fn early_return_skips_the_rest() {
  let source = r#"
    int main() {
      print("a");
      if (true) { return 0; }
      print("b");
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "a");
}

#[test]
fn return_inside_loop_terminates_it() {
  let source = r#"
    int main() {
      int i = 0;
      while (true) {
        if (i == 2) { return 0; }
        printint(i);
        i += 1;
      }
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "01");
}

#[test]
fn return_inside_switch_arm_silences_later_arms() {
  let source = r#"
    int main() {
      switch (1) {
        case 1: print("one"); return 0;
        case 2: print("two"); break;
      }
      print("after");
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "one");
}

// ============================================================
// Functions
// ============================================================

#[test]
fn function_calls_pass_parameters() {
  let source = r#"
    int add(int a, int b) { return a + b; }
    int main() { printint(add(3, 4)); return 0; }
  "#;
  assert_eq!(run_both_ways(source, b""), "7");
}

#[test]
fn nested_and_repeated_calls() {
  let source = r#"
    int add(int a, int b) { return a + b; }
    int twice(int n) { return add(n, n); }
    int main() {
      printint(twice(add(1, 2)));
      printint(add(twice(2), 1));
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "65");
}

#[test]
fn callee_locals_do_not_leak_into_caller() {
  let source = r#"
    int probe() { int t = 99; return t; }
    int main() {
      int x = probe();
      int y = probe();
      printint(x + y - 100);
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "98");
}

#[test]
fn void_functions_run_for_effect() {
  let source = r#"
    void greet(int n) { while (n > 0) { print("hi"); n -= 1; } }
    int main() { greet(2); return 0; }
  "#;
  assert_eq!(run_both_ways(source, b""), "hihi");
}

#[test]
fn early_return_from_callee() {
  let source = r#"
    int clamp(int x) {
      if (x > 9) { return 9; }
      return x;
    }
    int main() { printint(clamp(200)); printint(clamp(4)); return 0; }
  "#;
  assert_eq!(run_both_ways(source, b""), "94");
}

#[test]
fn argument_evaluation_is_left_to_right() {
  let source = r#"
    int tag(int n) { printint(n); return n; }
    int sub(int a, int b) { return a - b; }
    int main() { printint(sub(tag(5), tag(2))); return 0; }
  "#;
  assert_eq!(run_source(source), "523");
}

// ============================================================
// Globals and arrays
// ============================================================

#[test]
fn globals_initialize_before_main() {
  let source = r#"
    int g = 7;
    int garr[2] = {1, 2};
    int main() { printint(g + garr[1]); return 0; }
  "#;
  assert_eq!(run_both_ways(source, b""), "9");
}

#[test]
fn globals_are_shared_across_functions() {
  let source = r#"
    int counter;
    void bump() { counter += 1; }
    int main() { bump(); bump(); bump(); printint(counter); return 0; }
  "#;
  assert_eq!(run_source(source), "3");
}

#[test]
fn array_write_with_variable_index() {
  let source = r#"
    int main() {
      int a[4];
      int i = 0;
      while (i < 4) {
        a[i] = i * 2;
        i += 1;
      }
      printint(a[3]);
      printint(a[0]);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "60");
}

#[test]
fn array_read_does_not_disturb_neighbors() {
  let source = r#"
    int main() {
      int a[3] = {5, 6, 7};
      int i = 1;
      printint(a[i]);
      printint(a[0]);
      printint(a[2]);
      printint(a[i]);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "6576");
}

#[test]
fn multi_dimensional_arrays_flatten_row_major() {
  let source = r#"
    int main() {
      int m[2][3] = {{1, 2, 3}, {4, 5, 6}};
      printint(m[1][2]);
      int r = 1;
      int c = 0;
      printint(m[r][c]);
      m[r][c] = 9;
      printint(m[1][0]);
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "649");
}

#[test]
fn char_array_from_string_initializer() {
  let source = r#"
    int main() {
      char s[5] = "hey";
      int i = 0;
      while (s[i] != 0) {
        printchar(s[i]);
        i += 1;
      }
      return 0;
    }
  "#;
  assert_eq!(run_both_ways(source, b""), "hey");
}

#[test]
fn bool_cells_hold_truth_values() {
  let source = r#"
    int main() {
      bool b = true;
      if (b) print("t");
      b = 3 < 2;
      if (!b) print("f");
      return 0;
    }
  "#;
  assert_eq!(run_source(source), "tf");
}

// ============================================================
// Diagnostics
// ============================================================

fn compile_error(source: &str) -> CompileError {
  compile(source, &Options::default()).expect_err("compilation should have failed")
}

#[test]
fn undeclared_identifier_is_a_semantic_error() {
  let err = compile_error("int main() { return x; }");
  assert!(matches!(err, CompileError::Semantic { .. }), "{err}");
  assert_eq!(err.exit_code(), 2);
}

#[test]
fn recursion_is_rejected() {
  let err = compile_error("int f() { return f(); } int main() { return f(); }");
  assert!(matches!(err, CompileError::Semantic { .. }), "{err}");
  assert!(err.to_string().contains("recursive"));
}

#[test]
fn mutual_recursion_is_rejected() {
  let source = r#"
    int a(int n) { return b(n); }
    int b(int n) { return a(n); }
    int main() { return a(1); }
  "#;
  assert!(matches!(compile_error(source), CompileError::Semantic { .. }));
}

#[test]
fn break_outside_loop_is_rejected() {
  let err = compile_error("int main() { break; return 0; }");
  assert!(err.to_string().contains("break outside"));
}

#[test]
fn caller_locals_are_invisible_to_the_callee() {
  let source = r#"
    int helper() { return z; }
    int main() { int z = 5; return helper(); }
  "#;
  let err = compile_error(source);
  assert!(err.to_string().contains("undeclared"), "{err}");
}

#[test]
fn wrong_arity_is_rejected() {
  let err = compile_error("int f(int a) { return a; } int main() { return f(); }");
  assert!(matches!(err, CompileError::Semantic { .. }), "{err}");
}

#[test]
fn redeclaration_in_same_scope_is_rejected() {
  let err = compile_error("int main() { int x; int x; return 0; }");
  assert!(err.to_string().contains("redeclaration"));
}

#[test]
fn void_value_in_expression_is_rejected() {
  let err = compile_error("void v() {} int main() { return v(); }");
  assert!(matches!(err, CompileError::Semantic { .. }), "{err}");
}

#[test]
fn return_type_mismatch_is_rejected() {
  let err = compile_error("void v() { return 1; } int main() { v(); return 0; }");
  assert!(matches!(err, CompileError::Semantic { .. }), "{err}");
}

#[test]
fn oversized_array_is_a_capacity_error() {
  let err = compile_error("int main() { int a[16][16]; return 0; }");
  assert!(matches!(err, CompileError::Capacity { .. }), "{err}");
}

#[test]
fn missing_semicolon_is_a_syntax_error() {
  let err = compile_error("int main() { return 0 }");
  assert!(matches!(err, CompileError::Syntax { .. }), "{err}");
  assert_eq!(err.exit_code(), 2);
}

#[test]
fn oversized_literal_is_a_lexical_error() {
  let err = compile_error("int main() { return 999; }");
  assert!(matches!(err, CompileError::Lexical { .. }), "{err}");
}

#[test]
fn missing_main_is_rejected() {
  let err = compile_error("int helper() { return 1; }");
  assert!(err.to_string().contains("main"));
}

// ============================================================
// Universal properties
// ============================================================

/// Every `[`…`]` region of a walker-free program nets the pointer back to
/// where it started; statements therefore return to the work origin.
fn bracket_regions_are_pointer_neutral(text: &str) -> bool {
  fn region(bytes: &[u8], mut i: usize) -> Option<(i64, usize)> {
    let mut delta = 0i64;
    while i < bytes.len() {
      match bytes[i] {
        b'>' => delta += 1,
        b'<' => delta -= 1,
        b'[' => {
          let (inner, next) = region(bytes, i + 1)?;
          if inner != 0 {
            return None;
          }
          i = next;
        }
        b']' => return Some((delta, i)),
        _ => {}
      }
      i += 1;
    }
    Some((delta, i))
  }
  region(text.as_bytes(), 0).is_some()
}

#[test]
fn statements_return_the_pointer_to_the_work_origin() {
  // Walker-free programs only: the array caravan moves the pointer by a
  // runtime amount inside its loops by design.
  let sources = [
    "int main() { return 0; }",
    "int main() { int a = 3; int b = 4; printint(a + b); return 0; }",
    "int main() { int i = 0; while (i < 5) { printint(i); i = i + 1; } return 0; }",
    "int f(int n) { return n * n; } int main() { printint(f(3)); return 0; }",
    "int main() { switch (2) { case 2: print(\"y\"); break; default: print(\"n\"); } return 0; }",
  ];
  for source in sources {
    let text = compile(source, &Options::default()).expect("compilation failed");
    assert!(
      bracket_regions_are_pointer_neutral(&text),
      "pointer escaped a bracket region in: {source}"
    );
  }
}

#[test]
fn minification_is_idempotent() {
  let source = "int main() { print(\"ok\"); return 0; }";
  let text = compile(source, &Options::default()).expect("compilation failed");
  assert_eq!(program::minify(&text), text);
  assert_eq!(program::minify(&program::minify(&text)), program::minify(&text));
}

#[test]
fn optimization_is_idempotent_on_real_programs() {
  let sources = [
    "int main() { int a = 3; printint(a * 2); return 0; }",
    "int main() { int i = 0; while (i < 3) { printint(i); i += 1; } return 0; }",
  ];
  for source in sources {
    let emitted = compile_to_program(source, &Options::default()).expect("compilation failed");
    let once = optimize::optimize(&emitted);
    let twice = optimize::optimize(&once);
    assert_eq!(once.minified(), twice.minified());
  }
}

#[test]
fn optimizer_never_grows_the_program() {
  let source = "int main() { int a[3] = {1,2,3}; int i = 1; printint(a[i]); return 0; }";
  let emitted = compile_to_program(source, &Options::default()).expect("compilation failed");
  let optimized = optimize::optimize(&emitted);
  assert!(optimized.len() <= emitted.len());
}
