//! Template variable substitution for deployments.
//!
//! Substitution is plain `{{NAME}}` regex replacement over a whitelisted
//! variable set; there is no expression evaluation of any kind. Placeholders
//! not covered by the caller's variables pass through verbatim.

use std::collections::HashMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const ALLOWED_VARIABLES: &[&str] = &[
    "PROJECT_NAME",
    "PROJECT_DESCRIPTION",
    "AUTHOR",
    "DATE",
    "ARCHITECTURE_DESCRIPTION",
];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("PROJECT_NAME is required")]
    MissingProjectName,
    #[error("PROJECT_NAME cannot be empty")]
    EmptyProjectName,
    #[error("disallowed variables: {0}")]
    DisallowedVariable(String),
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("valid regex"));

/// Validate caller-supplied variables against the whitelist.
pub fn validate_variables(variables: &HashMap<String, String>) -> Result<(), TemplateError> {
    let Some(project_name) = variables.get("PROJECT_NAME") else {
        return Err(TemplateError::MissingProjectName);
    };
    if project_name.trim().is_empty() {
        return Err(TemplateError::EmptyProjectName);
    }

    let mut disallowed: Vec<&str> = variables
        .keys()
        .map(String::as_str)
        .filter(|key| !ALLOWED_VARIABLES.contains(key))
        .collect();
    if !disallowed.is_empty() {
        disallowed.sort_unstable();
        return Err(TemplateError::DisallowedVariable(disallowed.join(", ")));
    }
    Ok(())
}

/// Fill in defaulted variables (today's ISO date for DATE).
pub fn with_defaults(mut variables: HashMap<String, String>) -> HashMap<String, String> {
    variables
        .entry("DATE".to_string())
        .or_insert_with(|| Utc::now().format("%Y-%m-%d").to_string());
    variables
}

/// Substitute `{{NAME}}` placeholders. Unknown placeholders are left as-is.
pub fn render_content(content: &str, variables: &HashMap<String, String>) -> String {
    if variables.is_empty() {
        return content.to_string();
    }
    PLACEHOLDER_RE
        .replace_all(content, |caps: &regex::Captures| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            match variables.get(name) {
                Some(value) => value.clone(),
                None => caps.get(0).map_or("", |m| m.as_str()).to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_whitelisted_variables() {
        let variables = vars(&[("PROJECT_NAME", "skillmeat"), ("AUTHOR", "dev")]);
        let rendered = render_content("# {{PROJECT_NAME}} by {{AUTHOR}}", &variables);
        assert_eq!(rendered, "# skillmeat by dev");
    }

    #[test]
    fn unknown_placeholders_stay_verbatim() {
        let variables = vars(&[("PROJECT_NAME", "x")]);
        let rendered = render_content("{{PROJECT_NAME}} {{NOT_A_VAR}}", &variables);
        assert_eq!(rendered, "x {{NOT_A_VAR}}");
    }

    #[test]
    fn missing_project_name_is_rejected() {
        let err = validate_variables(&vars(&[("AUTHOR", "dev")])).unwrap_err();
        assert!(matches!(err, TemplateError::MissingProjectName));
    }

    #[test]
    fn empty_project_name_is_rejected() {
        let err = validate_variables(&vars(&[("PROJECT_NAME", "  ")])).unwrap_err();
        assert!(matches!(err, TemplateError::EmptyProjectName));
    }

    #[test]
    fn disallowed_variables_are_listed_sorted() {
        let err = validate_variables(&vars(&[
            ("PROJECT_NAME", "x"),
            ("ZZZ", "1"),
            ("AAA", "2"),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "disallowed variables: AAA, ZZZ");
    }

    #[test]
    fn date_defaults_to_today_iso() {
        let variables = with_defaults(vars(&[("PROJECT_NAME", "x")]));
        let date = variables.get("DATE").unwrap();
        assert_eq!(date.len(), 10);
        assert_eq!(&date[4..5], "-");
    }

    #[test]
    fn repeated_placeholders_all_substitute() {
        let variables = vars(&[("PROJECT_NAME", "x")]);
        let rendered =
            render_content("{{PROJECT_NAME}}/{{PROJECT_NAME}}/{{PROJECT_NAME}}", &variables);
        assert_eq!(rendered, "x/x/x");
    }
}
