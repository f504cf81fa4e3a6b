//! Control panels.
//!
//! egui immediate-mode UI: a top bar with frame-rate and camera status,
//! and a side panel with one section per layer. The panels' only write
//! path into a layer is the transport operations and the percent
//! parameter setters; everything else is read-only display.

use egui::{Color32, Context, RichText, Slider, Ui};

use crate::composition::{Composition, Layer, LayerKind};

/// Values the panels display but do not own.
pub struct UiStats {
    pub fps: f64,
    pub camera_connected: bool,
    pub camera_failed: bool,
    pub camera_resolution: Option<(u32, u32)>,
    pub captured_frames: usize,
}

/// Panel visibility, toggled with the `U` key.
pub struct UiState {
    pub panels_visible: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            panels_visible: true,
        }
    }
}

impl UiState {
    pub fn toggle(&mut self) {
        self.panels_visible = !self.panels_visible;
    }
}

/// Draw all panels for one frame.
pub fn draw(ctx: &Context, state: &UiState, composition: &mut Composition, stats: &UiStats) {
    egui::TopBottomPanel::top("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            ui.label("inkloop");
            ui.separator();
            ui.label(format!("FPS: {:.1}", stats.fps));
            ui.separator();
            if stats.camera_failed {
                ui.label(
                    RichText::new("Couldn't get webcam feed")
                        .color(Color32::from_rgb(220, 100, 100)),
                );
            } else if let Some((w, h)) = stats.camera_resolution {
                ui.label(format!("Camera: {}x{}", w, h));
            } else if stats.camera_connected {
                ui.label("Camera: waiting for frames...");
            } else {
                ui.label("Camera: not connected");
            }
            ui.separator();
            ui.label(format!("Captured frames: {}", stats.captured_frames));
        });
    });

    if !state.panels_visible {
        return;
    }

    egui::SidePanel::left("layers").show(ctx, |ui| {
        ui.heading("Layers");
        ui.separator();

        egui::ScrollArea::vertical().show(ui, |ui| {
            for layer in composition.layers_mut() {
                layer_section(ui, layer);
                ui.separator();
            }
        });
    });
}

fn layer_section(ui: &mut Ui, layer: &mut Layer) {
    ui.label(RichText::new(layer.name()).small());

    if layer.kind() == LayerKind::Recordable {
        ui.horizontal(|ui| {
            if layer.is_recording() {
                if ui.button("Stop Recording").clicked() {
                    layer.stop_recording();
                }
            } else if ui.button("Record").clicked() {
                layer.start_recording();
            }

            if layer.is_playing() {
                if ui.button("Pause").clicked() {
                    layer.pause();
                }
            } else if ui.button("Play").clicked() {
                layer.play();
            }

            if ui.button("Clear").clicked() {
                layer.clear();
            }
        });

        let mut thru = layer.live_view();
        if ui.checkbox(&mut thru, "Thru").changed() {
            layer.set_live_view(thru);
        }

        ui.label(
            RichText::new(format!("{} frames", layer.frame_count()))
                .small()
                .color(Color32::from_gray(140)),
        );
    }

    percent_slider(ui, "Opacity", layer.opacity_percent(), |pct| {
        layer.set_opacity_percent(pct)
    });
    percent_slider(ui, "Invert", layer.invert_percent(), |pct| {
        layer.set_invert_percent(pct)
    });
    percent_slider(ui, "Softness", layer.softness_percent(), |pct| {
        layer.set_softness_percent(pct)
    });
    percent_slider(ui, "Thresh", layer.thresh_percent(), |pct| {
        layer.set_thresh_percent(pct)
    });
}

fn percent_slider(ui: &mut Ui, label: &str, current: u32, mut apply: impl FnMut(u32)) {
    let mut pct = current;
    if ui.add(Slider::new(&mut pct, 0..=100).text(label)).changed() {
        apply(pct);
    }
}
