//! Desktop window surface (minifb)

use minifb::{Key, Window, WindowOptions};
use tracing::info;

use super::{ClientError, Display, DisplayControl};
use crate::frame::Frame;

/// Window opened lazily at the size of the first frame; `q` or Escape quits
pub struct WindowDisplay {
    title: String,
    window: Option<Window>,
    size: (usize, usize),
    argb: Vec<u32>,
}

impl WindowDisplay {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            window: None,
            size: (0, 0),
            argb: Vec::new(),
        }
    }

    fn window_for(&mut self, width: usize, height: usize) -> Result<&mut Window, ClientError> {
        if self.window.is_none() || self.size != (width, height) {
            info!("Opening {}x{} window", width, height);
            let window = Window::new(&self.title, width, height, WindowOptions::default())
                .map_err(|e| ClientError::Display(e.to_string()))?;
            self.window = Some(window);
            self.size = (width, height);
        }

        self.window
            .as_mut()
            .ok_or_else(|| ClientError::Display("window unavailable".to_string()))
    }
}

impl Display for WindowDisplay {
    fn show(&mut self, frame: &Frame) -> Result<DisplayControl, ClientError> {
        let (width, height) = (frame.width() as usize, frame.height() as usize);

        // Packed 0RGB for minifb
        let mut argb = std::mem::take(&mut self.argb);
        argb.clear();
        argb.extend(
            frame
                .data()
                .chunks_exact(3)
                .map(|px| (u32::from(px[0]) << 16) | (u32::from(px[1]) << 8) | u32::from(px[2])),
        );

        let window = self.window_for(width, height)?;
        window
            .update_with_buffer(&argb, width, height)
            .map_err(|e| ClientError::Display(e.to_string()))?;

        let quit = !window.is_open() || window.is_key_down(Key::Escape) || window.is_key_down(Key::Q);
        self.argb = argb;

        Ok(if quit {
            DisplayControl::Quit
        } else {
            DisplayControl::Continue
        })
    }
}
