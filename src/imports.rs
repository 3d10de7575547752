use once_cell::sync::Lazy;
use regex_lite::{Captures, Regex};

use crate::error::{ModuleError, Result};

/// Extracts the import paths declared by a `.proto` file.
pub trait ImportParser: Send + Sync {
    fn imports(&self, path: &str, data: &[u8]) -> Result<Vec<String>>;
}

// String literals are matched so that comment markers inside them are kept.
static LITERALS_AND_COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|//[^\n]*|/\*.*?(?:\*/|\z)"#)
        .unwrap()
});

static IMPORT_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^import(?:\s+(?:public|weak))?\s*(?:"([^"]*)"|'([^']*)')$"#).unwrap()
});

/// Recognizes `import "x";`, `import public "x";` and `import weak "x";`
/// statements anywhere in a file, after removing comments. The rest of the
/// grammar is not parsed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineImportParser;

impl ImportParser for LineImportParser {
    fn imports(&self, path: &str, data: &[u8]) -> Result<Vec<String>> {
        let content = std::str::from_utf8(data).map_err(|_| ModuleError::InvalidUtf8 {
            path: path.to_string(),
        })?;
        let stripped = strip_comments(content);
        Ok(stripped
            .split(|c| c == ';' || c == '{' || c == '}')
            .filter_map(parse_import_statement)
            .collect())
    }
}

fn strip_comments(content: &str) -> String {
    LITERALS_AND_COMMENTS
        .replace_all(content, |captures: &Captures<'_>| {
            let token = &captures[0];
            if token.starts_with('/') {
                " ".to_string()
            } else {
                token.to_string()
            }
        })
        .into_owned()
}

fn parse_import_statement(statement: &str) -> Option<String> {
    let captures = IMPORT_STATEMENT.captures(statement.trim())?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extract_imports() {
        let content = r#"
syntax = "proto3";

package acme.weather.v1;

import "scalapb/scalapb.proto";
import public "google/protobuf/descriptor.proto";
import weak 'google/protobuf/struct.proto';
// import "commented/out.proto";
/*
import "block/comment.proto";
*/
message Weather {
  string important_field = 1;
}
"#;
        let imports = LineImportParser
            .imports("acme/weather/v1/weather.proto", content.as_bytes())
            .unwrap();
        assert_eq!(
            imports,
            vec![
                "scalapb/scalapb.proto",
                "google/protobuf/descriptor.proto",
                "google/protobuf/struct.proto"
            ]
        );
    }

    #[test]
    fn ignores_identifiers_starting_with_import() {
        assert_eq!(parse_import_statement("imports = 3"), None);
        assert_eq!(parse_import_statement("importpublic \"a.proto\""), None);
        assert_eq!(
            parse_import_statement("\n  import \"a.proto\"  "),
            Some("a.proto".to_string())
        );
        assert_eq!(parse_import_statement("import \"unterminated"), None);
    }

    fn imports(content: &str) -> Vec<String> {
        LineImportParser
            .imports("acme/a/v1/a.proto", content.as_bytes())
            .unwrap()
    }

    #[test]
    fn several_imports_on_one_line() {
        assert_eq!(
            imports("syntax = \"proto3\"; import \"b.proto\"; import public \"c.proto\";"),
            vec!["b.proto", "c.proto"]
        );
    }

    #[test]
    fn import_after_block_comment() {
        assert_eq!(imports("/* x */ import \"c.proto\";"), vec!["c.proto"]);
        assert_eq!(
            imports("import /* weak */ \"d.proto\";\nimport\n  \"e.proto\";"),
            vec!["d.proto", "e.proto"]
        );
    }

    #[test]
    fn block_comment_opened_after_code() {
        let content = "import \"a.proto\"; /* start\nimport \"hidden.proto\";\n*/ import \"b.proto\";\n";
        assert_eq!(imports(content), vec!["a.proto", "b.proto"]);
        assert_eq!(
            imports("import \"a.proto\"; /* never closed\nimport \"hidden.proto\";\n"),
            vec!["a.proto"]
        );
    }

    #[test]
    fn comment_markers_inside_strings() {
        let content = "option go_package = \"acme.dev/*/v1\";\nimport \"b.proto\";\noption (x) = \"*/\";\nimport 'c.proto'; // import \"d.proto\";\n";
        assert_eq!(imports(content), vec!["b.proto", "c.proto"]);
    }

    #[test]
    fn import_after_message() {
        assert_eq!(
            imports("message A {}\nimport \"b.proto\";"),
            vec!["b.proto"]
        );
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let result = LineImportParser.imports("bad.proto", &[0xff, 0xfe]);
        assert!(matches!(result, Err(ModuleError::InvalidUtf8 { .. })));
    }
}
