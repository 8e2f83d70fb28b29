//! Rule-based stand-in for the oracle.
//!
//! Produces output that passes structural validation for each role; it does
//! not attempt a faithful translation.

use regex::Regex;
use testport::{OracleError, OracleRequest};

fn title(source: &str) -> String {
    let re = Regex::new(r#"(?:it|specify)(?:\.\w+)?\(\s*('[^']*'|"[^"]*")"#).unwrap();
    re.captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "'untitled'".to_string())
}

fn hook_call(source: &str) -> &'static str {
    let code = source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("//"))
        .unwrap_or("");
    if code.starts_with("beforeEach") {
        "test.beforeEach"
    } else if code.starts_with("before") {
        "test.beforeAll"
    } else if code.starts_with("afterEach") {
        "test.afterEach"
    } else {
        "test.afterAll"
    }
}

fn command_name(source: &str) -> String {
    let re = Regex::new(r#"Cypress\.Commands\.\w+\(\s*['"]([^'"]+)['"]"#).unwrap();
    re.captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "command".to_string())
}

pub fn translate(request: &OracleRequest) -> Result<String, OracleError> {
    let source = request.source.as_str();
    let text = match request.instructions.as_str() {
        "translate-test" => format!(
            "test({}, async ({{ page }}) => {{\n  await page.goto('/');\n}});",
            title(source)
        ),
        "translate-hook" => format!(
            "{}(async ({{ page }}) => {{\n  await page.goto('/');\n}});",
            hook_call(source)
        ),
        "translate-custom-command" => format!(
            "async function {}(page) {{\n  await page.goto('/');\n}}",
            command_name(source)
        ),
        _ if source.contains("cy.") => "// statement dropped".to_string(),
        _ => source.to_string(),
    };
    Ok(text)
}
