//! Parsing of `<element>.<key>=<value>` construction arguments.

use crate::errors::ConfigurationError;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static COORDINATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<element>[^.=\s]+)\.(?P<key>[^.=\s]+)$").expect("valid argument regex")
});

/// Raw argument strings grouped by element name, then key.
pub type ElementArguments = BTreeMap<String, BTreeMap<String, String>>;

/// Parses a flat argument list into per-element maps.
///
/// The value is everything after the first `=`, so values may themselves
/// contain `=` and `.`. A later entry for the same element and key replaces
/// an earlier one.
///
/// # Errors
///
/// Returns an error for entries without `=`, coordinates that are not
/// exactly `<element>.<key>`, and element names not in `element_names`.
pub fn parse_element_arguments<S: AsRef<str>>(
    arguments: &[S],
    element_names: &[String],
) -> Result<ElementArguments, ConfigurationError> {
    let mut parsed = ElementArguments::new();

    for argument in arguments {
        let argument = argument.as_ref();
        let (coordinate, value) = argument
            .split_once('=')
            .ok_or_else(|| ConfigurationError::malformed_argument(argument))?;

        let captures = COORDINATE
            .captures(coordinate)
            .ok_or_else(|| ConfigurationError::malformed_argument(argument))?;
        let element = &captures["element"];
        let key = &captures["key"];

        if !element_names.iter().any(|name| name == element) {
            return Err(ConfigurationError::unknown_element(element));
        }

        parsed
            .entry(element.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names() -> Vec<String> {
        vec!["traverser".to_string(), "extractor".to_string()]
    }

    #[test]
    fn test_parse_groups_by_element() {
        let parsed = parse_element_arguments(
            &[
                "traverser.top_level_dir=/data/set",
                "traverser.item_type=file",
                "extractor.extractor_name=core",
            ],
            &names(),
        )
        .unwrap();

        assert_eq!(parsed["traverser"]["top_level_dir"], "/data/set");
        assert_eq!(parsed["traverser"]["item_type"], "file");
        assert_eq!(parsed["extractor"]["extractor_name"], "core");
    }

    #[test]
    fn test_value_may_contain_separators() {
        let parsed = parse_element_arguments(&["extractor.filter=a.b=c"], &names()).unwrap();
        assert_eq!(parsed["extractor"]["filter"], "a.b=c");
    }

    #[test]
    fn test_later_entries_win() {
        let parsed =
            parse_element_arguments(&["extractor.mode=a", "extractor.mode=b"], &names()).unwrap();
        assert_eq!(parsed["extractor"]["mode"], "b");
    }

    #[test]
    fn test_malformed_arguments() {
        for bad in ["traverser", "traverser=1", "a.b.c=1", ".key=1", "traverser.=1"] {
            let err = parse_element_arguments(&[bad], &names()).unwrap_err();
            assert_eq!(err.code(), Some("CONDUCT-003-MALFORMED_ARGUMENT"), "{bad}");
        }
    }

    #[test]
    fn test_unknown_element() {
        let err = parse_element_arguments(&["adder.aggregate=true"], &names()).unwrap_err();
        assert_eq!(err.code(), Some("CONDUCT-004-UNKNOWN_ELEMENT"));
        assert_eq!(err.stages, vec!["adder".to_string()]);
    }
}
