use async_trait::async_trait;

/// Outbound mail seam. Delivery backends (SMTP, hosted senders) live outside
/// this service; handlers only hand messages over and treat failures as
/// non-fatal.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Logs outbound messages instead of delivering them.
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(to, subject, body_len = body.len(), "outbound mail");
        Ok(())
    }
}
