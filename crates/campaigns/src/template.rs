use common::{Error, Member, Result};

const ALLOWED_VARS: &[&str] = &["first_name", "last_name", "username", "name", "user_id"];
const SANITIZED_MAX_LEN: usize = 100;

/// Renders campaign templates against a target `Member`, restricted to a
/// closed set of variables. Anything outside that set is a validation
/// error at campaign-creation time, never a silent pass-through.
pub struct TemplateEngine;

impl TemplateEngine {
    /// Braces must be balanced and every `{var}` must be in the closed set;
    /// an empty template is rejected.
    pub fn validate(template: &str) -> Result<()> {
        if template.trim().is_empty() {
            return Err(Error::ValidationError("template must not be empty".into()));
        }

        let mut depth = 0i32;
        let mut current = String::new();
        let mut in_brace = false;

        for c in template.chars() {
            match c {
                '{' => {
                    if in_brace {
                        return Err(Error::ValidationError("unbalanced braces in template".into()));
                    }
                    in_brace = true;
                    depth += 1;
                    current.clear();
                }
                '}' => {
                    if !in_brace {
                        return Err(Error::ValidationError("unbalanced braces in template".into()));
                    }
                    in_brace = false;
                    depth -= 1;
                    if !ALLOWED_VARS.contains(&current.as_str()) {
                        return Err(Error::ValidationError(format!(
                            "unknown template variable: {{{current}}}"
                        )));
                    }
                }
                other if in_brace => current.push(other),
                _ => {}
            }
        }

        if depth != 0 {
            return Err(Error::ValidationError("unbalanced braces in template".into()));
        }

        Ok(())
    }

    /// Substitute every `{var}` exactly once; a template with no variables
    /// is returned unchanged (after trimming whitespace).
    pub fn render(template: &str, member: &Member) -> String {
        let mut out = String::with_capacity(template.len());
        let mut current = String::new();
        let mut in_brace = false;

        for c in template.chars() {
            match c {
                '{' => {
                    in_brace = true;
                    current.clear();
                }
                '}' => {
                    in_brace = false;
                    out.push_str(&sanitize(&resolve(&current, member)));
                }
                other if in_brace => current.push(other),
                other => out.push(other),
            }
        }

        out.trim().to_string()
    }
}

fn resolve(var: &str, member: &Member) -> String {
    match var {
        "first_name" => member.first_name.clone().unwrap_or_default(),
        "last_name" => member.last_name.clone().unwrap_or_default(),
        "username" => member.username.clone().unwrap_or_default(),
        "user_id" => member.user_id.to_string(),
        "name" => member
            .first_name
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| member.username.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| format!("User_{}", member.user_id)),
        _ => String::new(),
    }
}

fn sanitize(value: &str) -> String {
    let stripped: String = value
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '@' | '.' | '_' | '-'))
        .collect();
    stripped.chars().take(SANITIZED_MAX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(first_name: Option<&str>, username: Option<&str>) -> Member {
        Member {
            user_id: 42,
            username: username.map(String::from),
            first_name: first_name.map(String::from),
            last_name: None,
            phone: None,
        }
    }

    #[test]
    fn renders_known_variables() {
        let m = member(Some("Ana"), None);
        assert_eq!(TemplateEngine::render("Hello {first_name}", &m), "Hello Ana");
    }

    #[test]
    fn name_falls_back_to_username_then_generated_id() {
        let with_username = member(None, Some("benny"));
        assert_eq!(TemplateEngine::render("Hi {name}", &with_username), "Hi benny");

        let with_neither = member(None, None);
        assert_eq!(TemplateEngine::render("Hi {name}", &with_neither), "Hi User_42");
    }

    #[test]
    fn unknown_variable_rejected_at_validation() {
        assert!(TemplateEngine::validate("Hello {nickname}").is_err());
    }

    #[test]
    fn unbalanced_braces_rejected() {
        assert!(TemplateEngine::validate("Hello {first_name").is_err());
    }

    #[test]
    fn empty_template_rejected() {
        assert!(TemplateEngine::validate("   ").is_err());
    }

    #[test]
    fn template_without_variables_is_unchanged() {
        assert_eq!(TemplateEngine::validate("Plain text, no vars").unwrap(), ());
        let m = member(None, None);
        assert_eq!(TemplateEngine::render("  Plain text, no vars  ", &m), "Plain text, no vars");
    }
}
