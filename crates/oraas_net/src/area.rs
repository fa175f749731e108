//! A network area: member devices, their access lines, and the backbone.

use crate::link::Link;
use oraas_model::sampling::clipped_normal;
use oraas_model::DeviceId;
use rand_chacha::ChaCha8Rng;

/// One area of the cloud. Devices inside an area talk through their access
/// lines; traffic leaving the area also crosses the shared backbone.
#[derive(Debug, Clone)]
pub struct Area {
    /// Area id.
    pub id: usize,
    devices: Vec<DeviceId>,
    lines: Vec<Link>,
    backbone: Link,
}

impl Area {
    /// Creates an empty area with a sampled backbone.
    #[must_use]
    pub fn new(id: usize, rng: &mut ChaCha8Rng) -> Self {
        let bandwidth = clipped_normal(rng, 3.0, 2.0, 0.5) * 1000.0 / 8.0;
        let latency = clipped_normal(rng, 40.0, 20.0, 1.0);
        let jitter = clipped_normal(rng, 15.0, 10.0, 0.0);
        Self {
            id,
            devices: Vec::new(),
            lines: Vec::new(),
            backbone: Link::new(bandwidth, latency, jitter),
        }
    }

    /// Attaches a device: wired lines for servers, wireless for clients.
    /// `bandwidth` is the device's interface bandwidth.
    pub fn add_device(
        &mut self,
        wired: bool,
        device_id: DeviceId,
        bandwidth: f64,
        rng: &mut ChaCha8Rng,
    ) {
        let (latency, jitter) = if wired {
            (
                clipped_normal(rng, 3.0, 1.0, 1.0),
                clipped_normal(rng, 4.0, 1.0, 0.0),
            )
        } else {
            (
                clipped_normal(rng, 7.0, 2.0, 1.0),
                clipped_normal(rng, 6.0, 2.0, 0.0),
            )
        };
        self.devices.push(device_id);
        self.lines.push(Link::new(bandwidth, latency, jitter));
    }

    /// Ids of the devices attached to this area.
    #[must_use]
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Access line of a member device, if attached here.
    #[must_use]
    pub fn line_of(&self, device_id: DeviceId) -> Option<&Link> {
        let index = self.devices.iter().position(|&d| d == device_id)?;
        self.lines.get(index)
    }

    /// Mutable access line of a member device, if attached here.
    pub fn line_of_mut(&mut self, device_id: DeviceId) -> Option<&mut Link> {
        let index = self.devices.iter().position(|&d| d == device_id)?;
        self.lines.get_mut(index)
    }

    /// The area backbone.
    #[must_use]
    pub const fn backbone(&self) -> &Link {
        &self.backbone
    }

    /// Mutable area backbone.
    pub fn backbone_mut(&mut self) -> &mut Link {
        &mut self.backbone
    }

    /// Slot rollover for every line in the area.
    pub fn step(&mut self) {
        for line in &mut self.lines {
            line.step();
        }
        self.backbone.step();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn lines_track_attached_devices() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut area = Area::new(0, &mut rng);
        area.add_device(true, 7, 125.0, &mut rng);
        area.add_device(false, 9, 20.0, &mut rng);

        assert_eq!(area.devices(), &[7, 9]);
        assert!((area.line_of(7).unwrap().capacity_bw() - 125.0).abs() < f64::EPSILON);
        assert!((area.line_of(9).unwrap().capacity_bw() - 20.0).abs() < f64::EPSILON);
        assert!(area.line_of(8).is_none());
    }

    #[test]
    fn backbone_parameters_respect_floors() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        for id in 0..50 {
            let area = Area::new(id, &mut rng);
            assert!(area.backbone().capacity_bw() >= 0.5 * 1000.0 / 8.0);
            assert!(area.backbone().base_latency() >= 1.0);
            assert!(area.backbone().mean_jitter() >= 0.0);
        }
    }

    #[test]
    fn step_reaches_every_line() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut area = Area::new(0, &mut rng);
        area.add_device(true, 0, 125.0, &mut rng);
        area.line_of_mut(0).unwrap().occupy_until(50.0);
        area.backbone_mut().occupy_until(80.0);
        area.step();
        assert!(area.line_of(0).unwrap().occupied_time().abs() < f64::EPSILON);
        assert!(area.backbone().occupied_time().abs() < f64::EPSILON);
    }
}
