//! Canvas textures bundle diffuse, normal and specular maps for 2D lighting.
//! The filter and repeat enums are shared with canvas items and viewports.

use vesper_core::math::Color;
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind};

ordinal_enum! {
    pub enum CanvasTextureChannel {
        Diffuse = 0,
        Normal = 1,
        Specular = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum CanvasItemTextureFilter {
        #[default]
        Default = 0,
        Nearest = 1,
        Linear = 2,
        NearestWithMipmaps = 3,
        LinearWithMipmaps = 4,
        NearestWithMipmapsAnisotropic = 5,
        LinearWithMipmapsAnisotropic = 6,
    }
}

impl CanvasItemTextureFilter {
    /// `Default` defers to `parent`.
    #[must_use]
    pub fn resolve(self, parent: Self) -> Self {
        if self == Self::Default { parent } else { self }
    }

    #[must_use]
    pub fn is_nearest(self) -> bool {
        matches!(
            self,
            Self::Nearest | Self::NearestWithMipmaps | Self::NearestWithMipmapsAnisotropic
        )
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum CanvasItemTextureRepeat {
        #[default]
        Default = 0,
        Disabled = 1,
        Enabled = 2,
        Mirror = 3,
    }
}

impl CanvasItemTextureRepeat {
    #[must_use]
    pub fn resolve(self, parent: Self) -> Self {
        if self == Self::Default { parent } else { self }
    }
}

#[derive(Debug, Clone)]
pub struct CanvasTexture {
    pub channels: [Rid; 3],
    pub specular_color: Color,
    pub shininess: f32,
    pub texture_filter: CanvasItemTextureFilter,
    pub texture_repeat: CanvasItemTextureRepeat,
    pub changes: ChangeTracker,
}

impl Default for CanvasTexture {
    fn default() -> Self {
        Self {
            channels: [Rid::INVALID; 3],
            specular_color: Color::WHITE,
            shininess: 1.0,
            texture_filter: CanvasItemTextureFilter::Default,
            texture_repeat: CanvasItemTextureRepeat::Default,
            changes: ChangeTracker::new(),
        }
    }
}

impl CanvasTexture {
    #[must_use]
    pub fn diffuse(&self) -> Rid {
        self.channels[CanvasTextureChannel::Diffuse.ordinal() as usize]
    }
}

resource_store!(CanvasTextureStore, CanvasTexture, RidKind::CanvasTexture);

impl CanvasTextureStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, CanvasTexture::default());
    }

    field_setters! {
        texture_filter: CanvasItemTextureFilter,
        texture_repeat: CanvasItemTextureRepeat,
    }

    pub fn set_channel(&mut self, rid: Rid, channel: CanvasTextureChannel, texture: Rid) -> Result<()> {
        let ct = self.state_mut(rid)?;
        ct.channels[channel.ordinal() as usize] = texture;
        ct.changes.changed();
        Ok(())
    }

    pub fn set_shading_parameters(&mut self, rid: Rid, specular_color: Color, shininess: f32) -> Result<()> {
        let ct = self.state_mut(rid)?;
        ct.specular_color = specular_color;
        ct.shininess = shininess.clamp(0.0, 1.0);
        ct.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, ct) in self.owner.iter_mut() {
            let mut touched = false;
            for slot in &mut ct.channels {
                if *slot == freed {
                    *slot = Rid::INVALID;
                    touched = true;
                }
            }
            if touched {
                ct.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn filter_resolution() {
        use CanvasItemTextureFilter as F;
        assert_eq!(F::Default.resolve(F::Nearest), F::Nearest);
        assert_eq!(F::Linear.resolve(F::Nearest), F::Linear);
        assert_eq!(F::LinearWithMipmapsAnisotropic.ordinal(), 6);
    }

    #[test]
    fn channels_are_cleared_on_free() {
        let alloc = RidAllocator::new();
        let mut store = CanvasTextureStore::new();
        let ct = alloc.alloc(RidKind::CanvasTexture);
        let tex = alloc.alloc(RidKind::Texture);
        store.initialize(ct);
        store.set_channel(ct, CanvasTextureChannel::Diffuse, tex).unwrap();
        assert_eq!(store.get(ct).unwrap().diffuse(), tex);
        store.purge_reference(tex);
        assert_eq!(store.get(ct).unwrap().diffuse(), Rid::INVALID);
    }
}
