use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient toast rendered by the page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, level: NoticeLevel, text: impl Into<String>) {
        let notice = Notice { level, text: text.into() };
        debug!(level = ?notice.level, text = %notice.text, "notify");
        // a closed receiver just means nobody renders toasts anymore
        let _ = self.tx.send(notice);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.notify(NoticeLevel::Info, text)
    }

    pub fn success(&self, text: impl Into<String>) {
        self.notify(NoticeLevel::Success, text)
    }

    pub fn error(&self, text: impl Into<String>) {
        self.notify(NoticeLevel::Error, text)
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_arrive_in_order() {
        let (n, mut rx) = Notifier::channel();
        n.success("Sequence saved");
        n.error("Failed to load your sequences");
        let got = drain(&mut rx);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].level, NoticeLevel::Success);
        assert_eq!(got[1].text, "Failed to load your sequences");
        drop(rx);
        n.info("nobody listening");
    }
}
