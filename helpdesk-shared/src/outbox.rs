//! Transactional email templates
//!
//! Each function renders a message and queues it in the outbox. Pass the
//! caller's transaction so the email is only sent if the change commits.

use crate::models::email_job::{EmailJob, NewEmail};
use sqlx::PgExecutor;
use uuid::Uuid;

const SIGNATURE_TEXT: &str = "Best regards,\nThe Helpdesk Team";
const SIGNATURE_HTML: &str = "<p>Best regards,<br>The Helpdesk Team</p>";

/// Renders the invitation email for `organization_name`
pub fn invitation_email(
    organization_id: Uuid,
    recipient: &str,
    organization_name: &str,
    accept_url: &str,
) -> NewEmail {
    NewEmail {
        organization_id: Some(organization_id),
        recipient: recipient.to_string(),
        subject: format!("You're invited to join {} on Helpdesk", organization_name),
        text_body: format!(
            "You have been invited to join {organization_name}.\n\n\
             Sign in with this email address and accept the invitation here:\n\n\
             {accept_url}\n\n\
             The invitation expires in 7 days.\n\n{SIGNATURE_TEXT}"
        ),
        html_body: format!(
            "<p>You have been invited to join <strong>{organization_name}</strong>.</p>\n\
             <p><a href=\"{accept_url}\">Accept the invitation</a></p>\n\
             <p>The invitation expires in 7 days.</p>\n{SIGNATURE_HTML}"
        ),
    }
}

/// Renders the password reset email
pub fn password_reset_email(recipient: &str, reset_url: &str) -> NewEmail {
    NewEmail {
        organization_id: None,
        recipient: recipient.to_string(),
        subject: "Reset Your Password".to_string(),
        text_body: format!(
            "To reset your password, visit the following link:\n\n{reset_url}\n\n\
             If you did not request a password reset, simply ignore this email \
             and no changes will be made.\n\n{SIGNATURE_TEXT}"
        ),
        html_body: format!(
            "<p>To reset your password, click on the following link:</p>\n\
             <p><a href=\"{reset_url}\">Reset Password</a></p>\n\
             <p>If you did not request a password reset, simply ignore this email \
             and no changes will be made.</p>\n{SIGNATURE_HTML}"
        ),
    }
}

/// Queues a rendered message
pub async fn queue<'e, E>(executor: E, email: NewEmail) -> Result<EmailJob, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    EmailJob::enqueue(executor, email).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invitation_email_contains_link() {
        let email = invitation_email(
            Uuid::new_v4(),
            "new.hire@acme.com",
            "Acme",
            "https://helpdesk.example/invitations/abc/accept",
        );
        assert_eq!(email.recipient, "new.hire@acme.com");
        assert!(email.subject.contains("Acme"));
        assert!(email.text_body.contains("/invitations/abc/accept"));
        assert!(email.html_body.contains("href=\"https://helpdesk.example/invitations/abc/accept\""));
    }

    #[test]
    fn test_password_reset_email_has_no_organization() {
        let email = password_reset_email("jdoe@acme.com", "https://helpdesk.example/reset?t=1");
        assert!(email.organization_id.is_none());
        assert_eq!(email.subject, "Reset Your Password");
        assert!(email.text_body.contains("https://helpdesk.example/reset?t=1"));
    }
}
