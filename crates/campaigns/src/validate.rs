use common::{Error, Result};

use crate::template::TemplateEngine;

const MAX_TARGETS: usize = 10_000;
const MAX_ACCOUNTS: usize = 50;
const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 100;
const MIN_TEMPLATE_LEN: usize = 10;

/// Validates the fields a `CreateCampaign` call must check before a
/// campaign is allowed to exist at all.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(Error::ValidationError(format!(
            "campaign name must be {MIN_NAME_LEN}-{MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_'))
    {
        return Err(Error::ValidationError(
            "campaign name may only contain letters, digits, spaces, hyphens and underscores".into(),
        ));
    }
    Ok(())
}

pub fn validate_template(template: &str) -> Result<()> {
    if template.trim().len() < MIN_TEMPLATE_LEN {
        return Err(Error::ValidationError(format!(
            "template must be at least {MIN_TEMPLATE_LEN} characters"
        )));
    }
    TemplateEngine::validate(template)
}

pub fn validate_targets(target_ids: &[i64]) -> Result<()> {
    if target_ids.is_empty() {
        return Err(Error::ValidationError("at least one target is required".into()));
    }
    if target_ids.len() > MAX_TARGETS {
        return Err(Error::ValidationError(format!(
            "target list exceeds the maximum of {MAX_TARGETS}"
        )));
    }
    Ok(())
}

pub fn validate_accounts(account_ids: &[String]) -> Result<()> {
    if account_ids.is_empty() {
        return Err(Error::ValidationError("at least one account is required".into()));
    }
    if account_ids.len() > MAX_ACCOUNTS {
        return Err(Error::ValidationError(format!(
            "account list exceeds the maximum of {MAX_ACCOUNTS}"
        )));
    }
    Ok(())
}

pub fn validate_active_hours(start: Option<u32>, end: Option<u32>) -> Result<()> {
    for hour in [start, end].into_iter().flatten() {
        if hour > 23 {
            return Err(Error::ValidationError("active hours must be in 0..=23".into()));
        }
    }
    Ok(())
}

pub fn validate_active_days(days: &Option<Vec<u32>>) -> Result<()> {
    if let Some(days) = days {
        if days.iter().any(|&d| d > 6) {
            return Err(Error::ValidationError("active days must be in 0..=6".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_too_short_is_rejected() {
        assert!(validate_name("ab").is_err());
    }

    #[test]
    fn template_too_short_is_rejected() {
        assert!(validate_template("short").is_err());
    }

    #[test]
    fn too_many_targets_rejected() {
        let targets: Vec<i64> = (0..(MAX_TARGETS as i64 + 1)).collect();
        assert!(validate_targets(&targets).is_err());
    }

    #[test]
    fn too_many_accounts_rejected() {
        let accounts: Vec<String> = (0..(MAX_ACCOUNTS + 1)).map(|i| i.to_string()).collect();
        assert!(validate_accounts(&accounts).is_err());
    }

    #[test]
    fn active_hours_out_of_range_rejected() {
        assert!(validate_active_hours(Some(24), None).is_err());
    }

    #[test]
    fn active_days_out_of_range_rejected() {
        assert!(validate_active_days(&Some(vec![7])).is_err());
    }
}
