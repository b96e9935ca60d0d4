//! SDL2 preview window
//! Shows the ARGB output of every published frame. Closing the window stops
//! the capture run.

use std::fmt::Display;
use std::io;

use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{FrameObserver, PublishedFrame};
use crate::capture::frame::Geometry;
use crate::error::{CaptureError, Result};

fn sdl_error(context: &str, e: impl Display) -> CaptureError {
    CaptureError::resource("preview", context, io::Error::other(e.to_string()))
}

/// SDL2 Window Display
/// Renders straight from the ARGB region contents, no conversion needed.
pub struct Sdl2Preview {
    _sdl: sdl2::Sdl,
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    geometry: Geometry,
    cancel: CancellationToken,
}

impl Sdl2Preview {
    pub fn new(title: &str, geometry: Geometry, cancel: CancellationToken) -> Result<Self> {
        let sdl = sdl2::init().map_err(|e| sdl_error("init", e))?;
        let video_subsystem = sdl.video().map_err(|e| sdl_error("video subsystem", e))?;

        let window = video_subsystem
            .window(title, geometry.width, geometry.height)
            .position_centered()
            .build()
            .map_err(|e| sdl_error("window", e))?;

        // No vsync: presenting must never hold up the capture thread.
        let canvas = window
            .into_canvas()
            .build()
            .map_err(|e| sdl_error("canvas", e))?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl.event_pump().map_err(|e| sdl_error("event pump", e))?;

        info!("Preview window opened ({}x{})", geometry.width, geometry.height);
        Ok(Self {
            _sdl: sdl,
            canvas,
            texture_creator,
            event_pump,
            geometry,
            cancel,
        })
    }
}

impl FrameObserver for Sdl2Preview {
    fn on_frame(&mut self, frame: &PublishedFrame<'_>) -> Result<()> {
        for event in self.event_pump.poll_iter() {
            if let Event::Quit { .. } = event {
                info!("Quit event received");
                self.cancel.cancel();
            }
        }

        let Geometry { width, height } = self.geometry;
        // ARGB8888 is a native-endian word, i.e. B, G, R, A bytes on little-endian
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::ARGB8888, width, height)
            .map_err(|e| sdl_error("texture", e))?;
        texture
            .update(None, frame.argb, (width * 4) as usize)
            .map_err(|e| sdl_error("texture update", e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| sdl_error("copy", e))?;
        self.canvas.present();
        Ok(())
    }
}
