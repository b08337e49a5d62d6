use anyhow::{Context, Result};
use image::RgbImage;
use minifb::{Key, KeyRepeat, ScaleMode, Window, WindowOptions};

const MAX_INITIAL_WIDTH: usize = 1280;
const MAX_INITIAL_HEIGHT: usize = 800;

/// Display surface of the review loop.
pub trait Viewer {
    /// Show `frame` and block until a key is pressed.
    ///
    /// Returns the key's symbol name, or `None` once the window is closed.
    fn show(&mut self, frame: &RgbImage) -> Result<Option<String>>;
}

/// Pack RGB pixels into the `0RGB` words the window expects.
pub fn to_argb(frame: &RgbImage) -> Vec<u32> {
    frame
        .pixels()
        .map(|p| (u32::from(p[0]) << 16) | (u32::from(p[1]) << 8) | u32::from(p[2]))
        .collect()
}

/// Initial window size: the frame, shrunk to fit the screen budget.
fn initial_size(width: usize, height: usize) -> (usize, usize) {
    let scale = (MAX_INITIAL_WIDTH as f32 / width.max(1) as f32)
        .min(MAX_INITIAL_HEIGHT as f32 / height.max(1) as f32)
        .min(1.0);
    (
        ((width as f32 * scale) as usize).max(1),
        ((height as f32 * scale) as usize).max(1),
    )
}

/// Resizable desktop window.
pub struct WindowViewer {
    title: String,
    window: Option<Window>,
}

impl WindowViewer {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            window: None,
        }
    }

    fn window(&mut self, width: usize, height: usize) -> Result<&mut Window> {
        if self.window.is_none() {
            let (w, h) = initial_size(width, height);
            let mut window = Window::new(
                &self.title,
                w,
                h,
                WindowOptions {
                    resize: true,
                    scale_mode: ScaleMode::AspectRatioStretch,
                    ..WindowOptions::default()
                },
            )
            .context("opening review window")?;
            window.set_target_fps(30);
            self.window = Some(window);
        }
        self.window
            .as_mut()
            .context("review window missing")
    }
}

impl Viewer for WindowViewer {
    fn show(&mut self, frame: &RgbImage) -> Result<Option<String>> {
        let (width, height) = (frame.width() as usize, frame.height() as usize);
        let buffer = to_argb(frame);
        let window = self.window(width, height)?;

        while window.is_open() {
            window
                .update_with_buffer(&buffer, width, height)
                .context("updating review window")?;
            let pressed = window.get_keys_pressed(KeyRepeat::No);
            if let Some(key) = pressed.into_iter().find(|k| *k != Key::Unknown) {
                return Ok(Some(format!("{key:?}")));
            }
        }
        Ok(None)
    }
}
