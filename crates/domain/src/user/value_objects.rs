//! Validated user input.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::UserError;

const MIN_NAME_LENGTH: usize = 2;
const MIN_PHONE_LENGTH: usize = 12;
const MIN_PASSWORD_LENGTH: usize = 6;

/// Public profile fields of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

/// Sign-up form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub password: String,
}

impl Registration {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        phone_number: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone_number: phone_number.into(),
            email: None,
            password: password.into(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Trims every field and checks it. The first failing field is reported.
    pub fn validated(self) -> Result<Self, UserError> {
        Ok(Self {
            first_name: validate_name("firstName", &self.first_name)?,
            last_name: validate_name("lastName", &self.last_name)?,
            phone_number: validate_phone(&self.phone_number)?,
            email: match self.email.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(email) => Some(validate_email(email)?),
            },
            password: validate_password(&self.password)?,
        })
    }

    pub fn profile(&self) -> Profile {
        Profile {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub phone_number: String,
    pub password: String,
}

impl Credentials {
    pub fn new(phone_number: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            password: password.into(),
        }
    }
}

/// A self-service profile edit. Absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl ProfileUpdate {
    pub const ALLOWED_FIELDS: [&'static str; 4] = ["firstName", "lastName", "email", "password"];

    /// Builds an update from a raw JSON object.
    ///
    /// Unknown keys make the whole update invalid. Values are validated the
    /// same way as on registration.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, UserError> {
        if fields
            .keys()
            .any(|key| !Self::ALLOWED_FIELDS.contains(&key.as_str()))
        {
            return Err(UserError::InvalidUpdates);
        }

        let text = |field: &'static str| -> Result<Option<&str>, UserError> {
            match fields.get(field) {
                None => Ok(None),
                Some(Value::String(value)) => Ok(Some(value.as_str())),
                Some(_) => Err(UserError::invalid(field, "must be a string")),
            }
        };

        Ok(Self {
            first_name: text("firstName")?
                .map(|v| validate_name("firstName", v))
                .transpose()?,
            last_name: text("lastName")?
                .map(|v| validate_name("lastName", v))
                .transpose()?,
            email: text("email")?.map(validate_email).transpose()?,
            password: text("password")?.map(validate_password).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// The profile after this update.
    pub fn apply_to(&self, profile: &Profile) -> Profile {
        Profile {
            first_name: self
                .first_name
                .clone()
                .unwrap_or_else(|| profile.first_name.clone()),
            last_name: self
                .last_name
                .clone()
                .unwrap_or_else(|| profile.last_name.clone()),
            email: self.email.clone().or_else(|| profile.email.clone()),
        }
    }
}

pub(crate) fn validate_name(field: &'static str, value: &str) -> Result<String, UserError> {
    let trimmed = value.trim();
    if trimmed.chars().count() < MIN_NAME_LENGTH {
        return Err(UserError::invalid(
            field,
            format!("must be at least {MIN_NAME_LENGTH} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// International (`+380...`) or plain digit phone numbers.
pub(crate) fn validate_phone(value: &str) -> Result<String, UserError> {
    let trimmed = value.trim();
    if trimmed.len() < MIN_PHONE_LENGTH {
        return Err(UserError::invalid(
            "phoneNumber",
            format!("must be at least {MIN_PHONE_LENGTH} characters"),
        ));
    }

    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(UserError::invalid(
            "phoneNumber",
            format!("{trimmed} is not a valid phone number"),
        ));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_email(value: &str) -> Result<String, UserError> {
    let trimmed = value.trim();
    let invalid = || UserError::invalid("email", format!("{trimmed} is not a valid email"));

    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = trimmed.split_once('@').ok_or_else(invalid)?;
    let well_formed = !local.is_empty()
        && !domain.contains('@')
        && domain
            .split('.')
            .all(|label| !label.is_empty() && !label.starts_with('-') && !label.ends_with('-'))
        && domain.contains('.');

    if well_formed {
        Ok(trimmed.to_string())
    } else {
        Err(invalid())
    }
}

pub(crate) fn validate_password(value: &str) -> Result<String, UserError> {
    let trimmed = value.trim();
    if trimmed.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(UserError::invalid(
            "password",
            format!("must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }
    if trimmed.to_lowercase().contains("password") {
        return Err(UserError::invalid("password", "cannot contain 'password'"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: UserError) -> &'static str {
        match err {
            UserError::Invalid { field, .. } => field,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn registration_trims_fields() {
        let reg = Registration::new(" Ivan ", "Petrenko", " +380958167673 ", "secret1")
            .with_email(" ivan@example.com ")
            .validated()
            .unwrap();

        assert_eq!(reg.first_name, "Ivan");
        assert_eq!(reg.phone_number, "+380958167673");
        assert_eq!(reg.email.as_deref(), Some("ivan@example.com"));
    }

    #[test]
    fn short_name_is_rejected() {
        let err = Registration::new("I", "Petrenko", "+380958167673", "secret1")
            .validated()
            .unwrap_err();
        assert_eq!(field_of(err), "firstName");
    }

    #[test]
    fn phone_rules() {
        assert!(validate_phone("+380958167673").is_ok());
        assert!(validate_phone("380958167673").is_ok());
        assert!(validate_phone("+38095816").is_err());
        assert!(validate_phone("+38095-816-7673").is_err());
        assert!(validate_phone("phone-number-here").is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("no-at-sign.com").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a b@c.com").is_err());
        assert!(validate_email("@c.com").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("myPassWord1").is_err());
        assert_eq!(validate_password(" secret1 ").unwrap(), "secret1");
    }

    #[test]
    fn update_rejects_unknown_fields() {
        let fields = json!({"firstName": "Olena", "phoneNumber": "+380000000000"});
        let err = ProfileUpdate::from_fields(fields.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, UserError::InvalidUpdates));
    }

    #[test]
    fn update_validates_values() {
        let fields = json!({"password": "password123"});
        let err = ProfileUpdate::from_fields(fields.as_object().unwrap()).unwrap_err();
        assert_eq!(field_of(err), "password");
    }

    #[test]
    fn update_keeps_untouched_fields() {
        let fields = json!({"lastName": " Shevchenko "});
        let update = ProfileUpdate::from_fields(fields.as_object().unwrap()).unwrap();
        let before = Profile {
            first_name: "Olena".into(),
            last_name: "Koval".into(),
            email: None,
        };

        let after = update.apply_to(&before);
        assert_eq!(after.first_name, "Olena");
        assert_eq!(after.last_name, "Shevchenko");
    }
}
