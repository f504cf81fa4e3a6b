//! Layer set and transport state.
//!
//! The composition is a fixed set of layers created at startup: a number
//! of recordable ink layers plus one always-live layer that shows the
//! keyed camera feed. Layers are never added or removed at runtime; a
//! cleared layer keeps its identity for the session.

pub mod frames;
pub mod layer;
pub mod params;

pub use frames::{FrameId, ReleaseFrames};
pub use layer::{Layer, LayerKind};
pub use params::KeyParams;

/// The fixed set of layers the compositor draws.
#[derive(Debug)]
pub struct Composition {
    layers: Vec<Layer>,
}

impl Composition {
    /// Create `recordable_count` ink layers plus the always-live layer.
    pub fn new(recordable_count: usize) -> Self {
        let mut layers: Vec<Layer> = (0..recordable_count)
            .map(|i| Layer::new(i as u32, format!("layer-{}", i + 1), LayerKind::Recordable))
            .collect();
        layers.push(Layer::new(
            recordable_count as u32,
            "live-feed",
            LayerKind::AlwaysLive,
        ));
        Self { layers }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn get_layer_mut(&mut self, id: u32) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id() == id)
    }

    /// Indices in compositing order: the always-live plane is drawn
    /// first (bottom), then the recordable layers in creation order.
    pub fn draw_order(&self) -> impl Iterator<Item = usize> + '_ {
        let live = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.kind() == LayerKind::AlwaysLive)
            .map(|(i, _)| i);
        let recordable = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.kind() == LayerKind::Recordable)
            .map(|(i, _)| i);
        live.chain(recordable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composition_creation() {
        let comp = Composition::new(5);
        assert_eq!(comp.layer_count(), 6);
        assert_eq!(comp.layers()[0].name(), "layer-1");
        assert_eq!(comp.layers()[5].name(), "live-feed");
        assert_eq!(comp.layers()[5].kind(), LayerKind::AlwaysLive);
    }

    #[test]
    fn test_ids_are_unique_and_stable() {
        let comp = Composition::new(5);
        for (i, layer) in comp.layers().iter().enumerate() {
            assert_eq!(layer.id(), i as u32);
        }
    }

    #[test]
    fn test_draw_order_puts_live_plane_first() {
        let comp = Composition::new(3);
        let order: Vec<usize> = comp.draw_order().collect();
        assert_eq!(order, vec![3, 0, 1, 2]);
    }
}
