#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Extension for helper commands the launcher runs on the player's behalf
/// (installers, uninstallers, taskkill) that should never flash a console.
pub trait BackgroundCommandExt {
    /// Hides the console window on Windows. No-op on other platforms.
    fn suppress_console(&mut self) -> &mut Self;
}

impl BackgroundCommandExt for tokio::process::Command {
    fn suppress_console(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}
