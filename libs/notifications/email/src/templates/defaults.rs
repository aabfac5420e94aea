//! Embedded fallbacks for well-known template kinds.

const WELCOME: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{default Subject "Welcome"}}</title></head>
<body style="font-family: Arial, sans-serif; color: #1f2933; max-width: 600px; margin: 0 auto;">
  <h1>Welcome{{#if Name}}, {{Name}}{{/if}}!</h1>
  <p>{{default Body "Your account is ready. We are glad to have you on board."}}</p>
  {{#if Username}}<p>Your username is <strong>{{Username}}</strong>.</p>{{/if}}
  <hr>
  <p style="font-size: 12px; color: #7b8794;">&copy; {{Year}} Trenova. All rights reserved.</p>
</body>
</html>
"#;

const PASSWORD_RESET: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{default Subject "Reset your password"}}</title></head>
<body style="font-family: Arial, sans-serif; color: #1f2933; max-width: 600px; margin: 0 auto;">
  <h1>Password reset</h1>
  <p>Hello {{default Name "there"}},</p>
  <p>{{default Body "We received a request to reset your password."}}</p>
  {{#if ResetLink}}<p><a href="{{ResetLink}}">Reset your password</a></p>{{/if}}
  {{#if ExpiresIn}}<p>This link expires in {{ExpiresIn}}.</p>{{/if}}
  <p>If you did not request this, you can ignore this email.</p>
  <hr>
  <p style="font-size: 12px; color: #7b8794;">&copy; {{Year}} Trenova. All rights reserved.</p>
</body>
</html>
"#;

const INVOICE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{default Subject "Invoice"}}</title></head>
<body style="font-family: Arial, sans-serif; color: #1f2933; max-width: 600px; margin: 0 auto;">
  <h1>Invoice{{#if InvoiceNumber}} #{{InvoiceNumber}}{{/if}}</h1>
  <p>Hello {{default Name "there"}},</p>
  <p>{{default Body "Your invoice is attached."}}</p>
  {{#if Amount}}<p>Amount due: <strong>{{Amount}}</strong></p>{{/if}}
  {{#if DueDate}}<p>Due date: {{formatDate DueDate}}</p>{{/if}}
  <hr>
  <p style="font-size: 12px; color: #7b8794;">&copy; {{Year}} Trenova. All rights reserved.</p>
</body>
</html>
"#;

const GENERIC: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{Subject}}</title></head>
<body style="font-family: Arial, sans-serif; color: #1f2933; max-width: 600px; margin: 0 auto;">
  <h2>{{Subject}}</h2>
  <p>{{Body}}</p>
  <hr>
  <p style="font-size: 12px; color: #7b8794;">&copy; {{Year}} Trenova. All rights reserved.</p>
</body>
</html>
"#;

/// Embedded template for a well-known kind, `None` for anything else.
pub fn default_template(kind: &str) -> Option<&'static str> {
    match kind {
        "welcome" => Some(WELCOME),
        "password-reset" | "password_reset" => Some(PASSWORD_RESET),
        "invoice" => Some(INVOICE),
        "generic" => Some(GENERIC),
        _ => None,
    }
}
