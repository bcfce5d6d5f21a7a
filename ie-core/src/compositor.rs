//! Z-order video compositor: blends every enabled [VideoSource] into one
//! output frame at a fixed refresh period (§4.7).

use crate::video::{Frame, ScanlineAware, VideoSource};

/// Where a composited frame (and resolution changes) are delivered.
///
/// A real implementation wraps a GUI backend's window/texture; this core
/// specifies only the seam (§1 "GTK/FLTK/ebiten display backends" are
/// external collaborators).
pub trait CompositorOutput: Send {
    fn update_frame(&mut self, frame: &Frame);

    /// Pushes a resolution change to the backend. Failure is transient
    /// (§7): the compositor logs it and keeps compositing at the new
    /// dimensions regardless.
    fn set_display_config(&mut self, width: u32, height: u32) -> Result<(), String>;
}

struct PendingResolution {
    width: u32,
    height: u32,
    locked: bool,
}

/// Registers [VideoSource]s sorted by ascending layer and composites them
/// into one RGBA frame per [Compositor::composite] call.
pub struct Compositor {
    sources: Vec<Box<dyn VideoSource>>,
    width: u32,
    height: u32,
    final_frame: Frame,
    pending_resolution: Option<PendingResolution>,
    resolution_locked: bool,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Compositor {
            sources: Vec::new(),
            width,
            height,
            final_frame: Frame::new(width, height),
            pending_resolution: None,
            resolution_locked: false,
        }
    }

    /// Registers a source, keeping the list sorted by ascending layer
    /// (higher layers draw on top, §3 "Video Source").
    pub fn register_source(&mut self, source: Box<dyn VideoSource>) {
        let layer = source.get_layer();
        let pos = self.sources.iter().position(|s| s.get_layer() > layer).unwrap_or(self.sources.len());
        self.sources.insert(pos, source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn final_frame(&self) -> &Frame {
        &self.final_frame
    }

    /// Records a resolution-change request to be applied on the next
    /// [Compositor::composite] call; last writer wins. Ignored once
    /// [Compositor::lock_resolution] has been called (§4.7 "Resolution-
    /// change policy").
    pub fn notify_resolution_change(&mut self, width: u32, height: u32) {
        if self.resolution_locked {
            return;
        }
        self.pending_resolution = Some(PendingResolution { width, height, locked: false });
    }

    /// Applies a resolution change immediately and locks out any further
    /// [Compositor::notify_resolution_change] requests.
    pub fn lock_resolution(&mut self, width: u32, height: u32) {
        self.pending_resolution = Some(PendingResolution { width, height, locked: true });
    }

    fn apply_pending_resolution(&mut self, output: &mut dyn CompositorOutput) {
        let pending = match self.pending_resolution.take() {
            Some(p) => p,
            None => return,
        };
        self.width = pending.width;
        self.height = pending.height;
        self.final_frame.resize(pending.width, pending.height);
        if pending.locked {
            self.resolution_locked = true;
        }
        if let Err(err) = output.set_display_config(pending.width, pending.height) {
            log::warn!(
                "compositor: failed to propagate display config {}x{}: {}",
                pending.width, pending.height, err
            );
        }
    }

    fn enabled_indices(&self) -> Vec<usize> {
        self.sources.iter().enumerate().filter(|(_, s)| s.is_enabled()).map(|(i, _)| i).collect()
    }

    /// Composites one frame: applies any pending resolution change,
    /// selects the full-frame or scanline path, hands the result to
    /// `output`, then signals vsync to every registered source (§4.7
    /// "Composite algorithm").
    pub fn composite(&mut self, output: &mut dyn CompositorOutput) {
        self.apply_pending_resolution(output);

        let enabled = self.enabled_indices();
        let scanline_path = !enabled.is_empty()
            && enabled.iter().all(|&i| self.sources[i].as_scanline_aware().is_some());

        if scanline_path {
            self.composite_scanline(&enabled);
        } else {
            self.composite_full_frame(&enabled);
        }

        output.update_frame(&self.final_frame);
        for source in self.sources.iter_mut() {
            source.signal_vsync();
        }
    }

    fn composite_full_frame(&mut self, enabled: &[usize]) {
        self.final_frame.clear();
        for &i in enabled {
            let frame = self.sources[i].get_frame().clone();
            if frame.width == self.width && frame.height == self.height {
                self.final_frame.blend_over(&frame);
            } else {
                log::warn!(
                    "compositor: source frame {}x{} does not match compositor {}x{}, skipping",
                    frame.width, frame.height, self.width, self.height
                );
            }
        }
    }

    fn composite_scanline(&mut self, enabled: &[usize]) {
        for &i in enabled {
            if let Some(s) = self.sources[i].as_scanline_aware() {
                s.start_frame();
            }
        }
        for y in 0..self.height {
            for &i in enabled {
                if let Some(s) = self.sources[i].as_scanline_aware() {
                    s.process_scanline(y);
                }
            }
        }
        for &i in enabled {
            if let Some(s) = self.sources[i].as_scanline_aware() {
                s.finish_frame();
            }
        }

        self.final_frame.clear();
        for &i in enabled {
            let frame = self.sources[i].get_frame().clone();
            if frame.width == self.width && frame.height == self.height {
                self.final_frame.blend_over(&frame);
            }
        }
    }
}
