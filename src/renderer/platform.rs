use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

/// What the renderer needs from the window it presents to
pub trait PlatformWindow: HasDisplayHandle + HasWindowHandle {
    /// Client area in physical pixels.
    fn client_size(&self) -> (u32, u32);

    fn is_minimized(&self) -> bool;
}

impl PlatformWindow for Window {
    fn client_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }

    fn is_minimized(&self) -> bool {
        // Not every platform reports minimization, a zero sized client area is the fallback
        let (width, height) = self.client_size();
        Window::is_minimized(self).unwrap_or(false) || width == 0 || height == 0
    }
}
