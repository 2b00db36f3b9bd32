pub mod ast;
pub mod diagnostic;
pub mod emit;
pub mod lexeme;
pub mod lexer;
pub mod parser;
pub mod sema;
pub mod span;
pub mod symbol;

use diagnostic::{render_diagnostics, Diagnostic};
use lexer::Lexer;
use parser::Parser;

/// Lex and parse a source string. Diagnostics are rendered to stderr before
/// the error is returned.
pub fn parse_source(source: &str, filename: &str) -> Result<ast::Program, Vec<Diagnostic>> {
    let (tokens, lex_errors) = Lexer::new(source).tokenize();
    if !lex_errors.is_empty() {
        render_diagnostics(&lex_errors, filename, source);
        return Err(lex_errors);
    }

    match Parser::new(tokens).parse_program() {
        Ok(program) => Ok(program),
        Err(errors) => {
            render_diagnostics(&errors, filename, source);
            Err(errors)
        }
    }
}

/// Run the semantic pass, filling in the program's symbol tables. All
/// diagnostics are rendered; warnings alone do not fail the build.
pub fn analyze(
    program: &mut ast::Program,
    filename: &str,
    source: &str,
) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = sema::Analyzer::new().analyze(program);
    if diagnostics.is_empty() {
        return Ok(());
    }
    render_diagnostics(&diagnostics, filename, source);
    if diagnostics.iter().any(|d| d.is_error()) {
        Err(diagnostics)
    } else {
        Ok(())
    }
}

/// Compile a source string to RV32IM assembly text.
pub fn compile(source: &str, filename: &str) -> Result<String, Vec<Diagnostic>> {
    let mut program = parse_source(source, filename)?;
    analyze(&mut program, filename, source)?;

    let mut buffer = Vec::new();
    emit::generate(&program, filename, &mut buffer)
        .expect("writing to an in-memory buffer cannot fail");
    Ok(String::from_utf8(buffer).expect("emitted assembly is ASCII"))
}

/// Parse and analyze only (no assembly emission).
pub fn check(source: &str, filename: &str) -> Result<(), Vec<Diagnostic>> {
    let mut program = parse_source(source, filename)?;
    analyze(&mut program, filename, source)
}
