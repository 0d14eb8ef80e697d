//! Desktop collaborators: system browser and user-facing notifications

use tracing::{error, info};

/// Opens URLs in the user's browser
pub trait BrowserLauncher: Send + Sync {
    /// Open `url`; best effort
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Launches the platform's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        open::that(url)
    }
}

/// Surfaces informational and error messages to the user
pub trait UserNotifier: Send + Sync {
    /// Informational message
    fn info(&self, message: &str);

    /// Error message
    fn error(&self, message: &str);
}

/// Writes notifications to stderr (and the log)
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl UserNotifier for ConsoleNotifier {
    fn info(&self, message: &str) {
        info!(target: "oauth_session::notify", "{message}");
        eprintln!("{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "oauth_session::notify", "{message}");
        eprintln!("❌ {message}");
    }
}
