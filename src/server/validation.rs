use crate::server::response::ApiError;

const MAX_ENTRY_NAME_LEN: usize = 255;
const MAX_EMAIL_LEN: usize = 254;
const MAX_DISPLAY_NAME_LEN: usize = 100;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 1024;
const MAX_PLAN_NAME_LEN: usize = 64;
const MAX_KEY_NAME_LEN: usize = 100;

/// Checks a folder or file name and returns it trimmed.
fn validate_entry_name(name: &str, entity: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.chars().count() > MAX_ENTRY_NAME_LEN {
        return Err(format!(
            "{entity} name cannot exceed {MAX_ENTRY_NAME_LEN} characters"
        ));
    }
    if name == "." || name == ".." {
        return Err(format!("{entity} name cannot be '.' or '..'"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!(
            "{entity} name cannot contain slashes or NUL characters"
        ));
    }
    Ok(name.to_string())
}

pub fn validate_folder_name(name: &str) -> Result<String, ApiError> {
    validate_entry_name(name, "Folder").map_err(|m| ApiError::invalid_field("name", m))
}

pub fn validate_file_name(name: &str) -> Result<String, ApiError> {
    validate_entry_name(name, "File").map_err(|m| ApiError::invalid_field("name", m))
}

/// Checks an email address and returns it lowercased.
pub fn validate_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    let invalid = || ApiError::invalid_field("email", "Invalid email address");

    if email.len() > MAX_EMAIL_LEN || email.contains(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    Ok(email)
}

pub fn validate_password(password: &str, field: &'static str) -> Result<(), ApiError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ApiError::invalid_field(
            field,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ApiError::invalid_field(field, "Password is too long"));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::invalid_field("name", "Name cannot be empty"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ApiError::invalid_field(
            "name",
            format!("Name cannot exceed {MAX_DISPLAY_NAME_LEN} characters"),
        ));
    }
    Ok(name.to_string())
}

/// Accepts 7 to 20 characters of digits, spaces, hyphens and a leading plus.
pub fn validate_phone(phone: &str) -> Result<String, ApiError> {
    let phone = phone.trim();
    let invalid = || ApiError::invalid_field("phone", "Invalid phone number");

    if !(7..=20).contains(&phone.len()) {
        return Err(invalid());
    }
    let body = phone.strip_prefix('+').unwrap_or(phone);
    if !body.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
        || !body.chars().any(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    Ok(phone.to_string())
}

pub fn validate_plan_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_PLAN_NAME_LEN {
        return Err(ApiError::invalid_field(
            "name",
            format!("Plan name must be 1 to {MAX_PLAN_NAME_LEN} characters"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::invalid_field(
            "name",
            "Plan name can only contain alphanumeric characters, hyphens, and underscores",
        ));
    }
    Ok(name.to_string())
}

pub fn validate_key_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_KEY_NAME_LEN {
        return Err(ApiError::invalid_field(
            "name",
            format!("Key name must be 1 to {MAX_KEY_NAME_LEN} characters"),
        ));
    }
    Ok(name.to_string())
}

pub fn validate_currency(currency: &str) -> Result<String, ApiError> {
    let currency = currency.trim().to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::invalid_field(
            "currency",
            "Currency must be a three-letter code",
        ));
    }
    Ok(currency)
}

pub fn validate_non_negative(value: i64, field: &'static str) -> Result<(), ApiError> {
    if value < 0 {
        return Err(ApiError::invalid_field(
            field,
            format!("{field} cannot be negative"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_name_rules() {
        assert_eq!(validate_folder_name("  Photos ").unwrap(), "Photos");
        assert!(validate_folder_name("").is_err());
        assert!(validate_folder_name("   ").is_err());
        assert!(validate_folder_name("..").is_err());
        assert!(validate_folder_name("a/b").is_err());
        assert!(validate_folder_name("a\\b").is_err());
        assert!(validate_folder_name(&"x".repeat(256)).is_err());
        assert!(validate_folder_name(&"x".repeat(255)).is_ok());
        assert!(validate_folder_name("résumé 2024").is_ok());
    }

    #[test]
    fn test_folder_name_error_names_field() {
        let err = validate_folder_name("").unwrap_err();
        assert_eq!(err.field, Some("name"));
    }

    #[test]
    fn test_email_rules() {
        assert_eq!(
            validate_email(" Alice@Example.COM ").unwrap(),
            "alice@example.com"
        );
        assert!(validate_email("alice").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("alice@").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("short", "password").is_err());
        assert!(validate_password("long enough", "password").is_ok());
    }

    #[test]
    fn test_phone_rules() {
        assert!(validate_phone("+1 555-123-4567").is_ok());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("+abc1234567").is_err());
        assert!(validate_phone("-------").is_err());
    }

    #[test]
    fn test_plan_name_rules() {
        assert!(validate_plan_name("pro-annual").is_ok());
        assert!(validate_plan_name("pro annual").is_err());
        assert!(validate_plan_name("").is_err());
    }

    #[test]
    fn test_currency_rules() {
        assert_eq!(validate_currency("eur").unwrap(), "EUR");
        assert!(validate_currency("EURO").is_err());
    }
}
