use crossbeam::atomic::AtomicCell;

/// Host-controlled output volume, read once per rendered batch.
#[derive(Debug)]
pub struct Volume {
    master: AtomicCell<f32>,
    category: AtomicCell<f32>,
}

impl Volume {
    pub fn new(master: f32, category: f32) -> Self {
        Self {
            master: AtomicCell::new(clamp(master)),
            category: AtomicCell::new(clamp(category)),
        }
    }

    pub fn master(&self) -> f32 {
        self.master.load()
    }

    pub fn set_master(&self, value: f32) {
        self.master.store(clamp(value));
    }

    pub fn category(&self) -> f32 {
        self.category.load()
    }

    pub fn set_category(&self, value: f32) {
        self.category.store(clamp(value));
    }

    /// Product of both volumes.
    pub fn gain(&self) -> f64 {
        self.master() as f64 * self.category() as f64
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

fn clamp(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_is_product() {
        let volume = Volume::new(0.5, 0.5);
        assert_eq!(volume.gain(), 0.25);
        volume.set_category(1.0);
        assert_eq!(volume.gain(), 0.5);
    }

    #[test]
    fn test_values_are_clamped() {
        let volume = Volume::default();
        volume.set_master(3.0);
        volume.set_category(-1.0);
        assert_eq!(volume.master(), 1.0);
        assert_eq!(volume.category(), 0.0);
        volume.set_master(f32::NAN);
        assert_eq!(volume.master(), 0.0);
    }
}
