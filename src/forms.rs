use serde::Deserialize;
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_NAME_LEN: usize = 150;
pub const MAX_BOOKMARK_FIELD_LEN: usize = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("URL must start with http:// or https://")]
    InvalidUrl,
    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),
    #[error("Passwords must match")]
    PasswordMismatch,
}

/// Loose structural check: one `@`, non-empty local part, dotted domain,
/// no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

/// `http://` or `https://` followed by something.
pub fn is_web_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lower.len() > scheme.len() && lower.starts_with(scheme))
}

fn check_required(
    errors: &mut Vec<FormError>,
    field: &'static str,
    value: &str,
    max: usize,
) -> bool {
    if value.trim().is_empty() {
        errors.push(FormError::Required(field));
        return false;
    }
    if value.chars().count() > max {
        errors.push(FormError::TooLong { field, max });
        return false;
    }
    true
}

fn check_identity(errors: &mut Vec<FormError>, username: &str, email: &str) {
    check_required(errors, "Username", username, MAX_NAME_LEN);
    if check_required(errors, "Email", email, MAX_NAME_LEN) && !is_valid_email(email.trim()) {
        errors.push(FormError::InvalidEmail);
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub csrf_token: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Vec<FormError> {
        let mut errors = Vec::new();
        check_identity(&mut errors, &self.username, &self.email);

        if self.password.is_empty() {
            errors.push(FormError::Required("Password"));
        } else if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(FormError::PasswordTooShort(MIN_PASSWORD_LEN));
        }

        if self.confirm_password.is_empty() {
            errors.push(FormError::Required("Confirm Password"));
        } else if self.confirm_password != self.password {
            errors.push(FormError::PasswordMismatch);
        }

        errors
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub csrf_token: String,
    #[serde(default)]
    pub next: Option<String>,
}

impl LoginForm {
    pub fn validate(&self) -> Vec<FormError> {
        let mut errors = Vec::new();
        if self.username.trim().is_empty() {
            errors.push(FormError::Required("Username"));
        }
        if self.password.is_empty() {
            errors.push(FormError::Required("Password"));
        }
        errors
    }
}

/// Text fields of the multipart settings form.
#[derive(Debug, Default)]
pub struct SettingsForm {
    pub username: String,
    pub email: String,
    pub csrf_token: String,
}

impl SettingsForm {
    pub fn validate(&self) -> Vec<FormError> {
        let mut errors = Vec::new();
        check_identity(&mut errors, &self.username, &self.email);
        errors
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BookmarkForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub csrf_token: String,
}

impl BookmarkForm {
    pub fn validate(&self) -> Vec<FormError> {
        let mut errors = Vec::new();
        check_required(&mut errors, "Title", &self.title, MAX_BOOKMARK_FIELD_LEN);
        if check_required(&mut errors, "URL", &self.url, MAX_BOOKMARK_FIELD_LEN)
            && !is_web_url(&self.url)
        {
            errors.push(FormError::InvalidUrl);
        }
        errors
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CityForm {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub csrf_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, email: &str, password: &str, confirm: &str) -> RegisterForm {
        RegisterForm {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
            csrf_token: String::new(),
        }
    }

    mod email_tests {
        use super::*;

        #[test]
        fn test_valid_emails() {
            assert!(is_valid_email("alice@example.com"));
            assert!(is_valid_email("a.b+tag@mail.example.co.uk"));
        }

        #[test]
        fn test_invalid_emails() {
            assert!(!is_valid_email(""));
            assert!(!is_valid_email("alice"));
            assert!(!is_valid_email("@example.com"));
            assert!(!is_valid_email("alice@localhost"));
            assert!(!is_valid_email("alice@example..com"));
            assert!(!is_valid_email("alice@@example.com"));
            assert!(!is_valid_email("al ice@example.com"));
        }
    }

    mod register_tests {
        use super::*;

        #[test]
        fn test_valid_registration() {
            let form = register("alice", "alice@example.com", "secret1", "secret1");
            assert!(form.validate().is_empty());
        }

        #[test]
        fn test_all_fields_missing() {
            let errors = RegisterForm::default().validate();
            assert_eq!(
                errors,
                vec![
                    FormError::Required("Username"),
                    FormError::Required("Email"),
                    FormError::Required("Password"),
                    FormError::Required("Confirm Password"),
                ]
            );
        }

        #[test]
        fn test_short_password() {
            let errors = register("alice", "alice@example.com", "12345", "12345").validate();
            assert_eq!(errors, vec![FormError::PasswordTooShort(6)]);
        }

        #[test]
        fn test_password_mismatch() {
            let errors = register("alice", "alice@example.com", "secret1", "secret2").validate();
            assert_eq!(errors, vec![FormError::PasswordMismatch]);
        }

        #[test]
        fn test_invalid_email() {
            let errors = register("alice", "not-an-email", "secret1", "secret1").validate();
            assert_eq!(errors, vec![FormError::InvalidEmail]);
        }

        #[test]
        fn test_username_too_long() {
            let long = "x".repeat(151);
            let errors = register(&long, "alice@example.com", "secret1", "secret1").validate();
            assert_eq!(
                errors,
                vec![FormError::TooLong {
                    field: "Username",
                    max: 150
                }]
            );
        }

        #[test]
        fn test_deserialize_from_urlencoded() {
            let form: RegisterForm = serde_urlencoded::from_str(
                "username=alice&email=alice%40example.com&password=pw&confirm_password=pw",
            )
            .unwrap();
            assert_eq!(form.email, "alice@example.com");
            assert!(form.csrf_token.is_empty());
        }
    }

    mod login_tests {
        use super::*;

        #[test]
        fn test_requires_both_fields() {
            let errors = LoginForm::default().validate();
            assert_eq!(
                errors,
                vec![FormError::Required("Username"), FormError::Required("Password")]
            );
        }

        #[test]
        fn test_next_is_optional() {
            let form: LoginForm = serde_urlencoded::from_str("username=a&password=b").unwrap();
            assert!(form.next.is_none());
            assert!(form.validate().is_empty());

            let form: LoginForm =
                serde_urlencoded::from_str("username=a&password=b&next=%2Fbookmarks").unwrap();
            assert_eq!(form.next.as_deref(), Some("/bookmarks"));
        }
    }

    mod settings_tests {
        use super::*;

        #[test]
        fn test_settings_validation() {
            let form = SettingsForm {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                csrf_token: String::new(),
            };
            assert!(form.validate().is_empty());

            let form = SettingsForm {
                username: " ".to_string(),
                email: "bad".to_string(),
                csrf_token: String::new(),
            };
            assert_eq!(
                form.validate(),
                vec![FormError::Required("Username"), FormError::InvalidEmail]
            );
        }
    }

    mod bookmark_tests {
        use super::*;

        #[test]
        fn test_bookmark_requires_title_and_url() {
            let errors = BookmarkForm::default().validate();
            assert_eq!(
                errors,
                vec![FormError::Required("Title"), FormError::Required("URL")]
            );
        }

        #[test]
        fn test_bookmark_url_must_be_web_link() {
            let bookmark = |url: &str| BookmarkForm {
                title: "Story".to_string(),
                url: url.to_string(),
                csrf_token: String::new(),
            };

            assert!(bookmark("https://news.example.com/1").validate().is_empty());
            assert!(bookmark("HTTP://news.example.com").validate().is_empty());
            assert_eq!(
                bookmark("javascript:alert(1)").validate(),
                vec![FormError::InvalidUrl]
            );
            assert_eq!(
                bookmark(" data:text/html,hi").validate(),
                vec![FormError::InvalidUrl]
            );
            assert_eq!(bookmark("https://").validate(), vec![FormError::InvalidUrl]);
        }

        #[test]
        fn test_error_messages() {
            assert_eq!(FormError::Required("Title").to_string(), "Title is required");
            assert_eq!(FormError::PasswordMismatch.to_string(), "Passwords must match");
            assert_eq!(
                FormError::PasswordTooShort(6).to_string(),
                "Password must be at least 6 characters"
            );
        }
    }
}
