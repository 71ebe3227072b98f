//! D-Bus client for the `veracityd` analysis service.

use zbus::proxy;

#[proxy(
    interface = "org.freedesktop.Veracity1",
    default_service = "org.freedesktop.Veracity1",
    default_path = "/org/freedesktop/Veracity1"
)]
pub trait Veracity {
    /// Returns the verification record as JSON.
    fn analyze_video(&self, path: &str) -> zbus::Result<String>;

    fn status(&self) -> zbus::Result<String>;
}

/// Connect to the daemon on the session bus when `session` is set, else the system bus.
pub async fn connect(session: bool) -> zbus::Result<VeracityProxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await?
    } else {
        zbus::Connection::system().await?
    };
    VeracityProxy::new(&conn).await
}
