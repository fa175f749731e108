//! Device-to-device link bookkeeping across areas.

use crate::area::Area;
use crate::error::{Error, Result};
use crate::link::Link;
use oraas_model::{nearly_eq, Device, DeviceId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// Sampled end-to-end state of the path between two devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkState {
    /// Achievable speed: the bottleneck free bandwidth, MBps.
    pub speed: f64,
    /// Sum of base latencies along the path, ms.
    pub latency: f64,
    /// Sum of sampled jitter counts along the path.
    pub jitter: f64,
}

/// All areas of the cloud plus the device attachment map.
#[derive(Debug, Clone)]
pub struct Topology {
    areas: Vec<Area>,
    device_to_area: HashMap<DeviceId, usize>,
}

impl Topology {
    /// Creates `area_num` empty areas with sampled backbones.
    #[must_use]
    pub fn new(area_num: usize, rng: &mut ChaCha8Rng) -> Self {
        Self {
            areas: (0..area_num).map(|id| Area::new(id, rng)).collect(),
            device_to_area: HashMap::new(),
        }
    }

    /// Number of areas.
    #[must_use]
    pub fn area_num(&self) -> usize {
        self.areas.len()
    }

    /// Attaches a device to the given area, or to a random one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownArea`] for an out-of-range area id.
    pub fn add_device(
        &mut self,
        device: &Device,
        area_id: Option<usize>,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        let area_id = area_id.unwrap_or_else(|| rng.gen_range(0..self.areas.len()));
        let area = self
            .areas
            .get_mut(area_id)
            .ok_or(Error::UnknownArea(area_id))?;
        area.add_device(device.kind.is_wired(), device.id, device.free_bw(), rng);
        self.device_to_area.insert(device.id, area_id);
        Ok(())
    }

    /// Area id the device is attached to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached device.
    pub fn area_of(&self, device_id: DeviceId) -> Result<usize> {
        self.device_to_area
            .get(&device_id)
            .copied()
            .ok_or(Error::UnknownDevice(device_id))
    }

    /// The area holding a device.
    fn area(&self, device_id: DeviceId) -> Result<&Area> {
        Ok(&self.areas[self.area_of(device_id)?])
    }

    /// Access line of a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached device.
    pub fn access_link(&self, device_id: DeviceId) -> Result<&Link> {
        self.area(device_id)?
            .line_of(device_id)
            .ok_or(Error::UnknownDevice(device_id))
    }

    fn access_link_mut(&mut self, device_id: DeviceId) -> Result<&mut Link> {
        let area_id = self.area_of(device_id)?;
        self.areas[area_id]
            .line_of_mut(device_id)
            .ok_or(Error::UnknownDevice(device_id))
    }

    /// Bottleneck free bandwidth between two devices: the minimum over both
    /// access lines and, across areas, both backbones. A device talking to
    /// itself sees infinite speed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached endpoint.
    pub fn link_speed(&self, d1: DeviceId, d2: DeviceId) -> Result<f64> {
        if d1 == d2 {
            return Ok(f64::INFINITY);
        }
        let (a1, a2) = (self.area_of(d1)?, self.area_of(d2)?);
        let mut speed = self
            .access_link(d1)?
            .free_bw()
            .min(self.access_link(d2)?.free_bw());
        if a1 != a2 {
            speed = speed
                .min(self.areas[a1].backbone().free_bw())
                .min(self.areas[a2].backbone().free_bw());
        }
        Ok(speed)
    }

    /// Deterministic end-to-end base latency between two devices, ms.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached endpoint.
    pub fn link_latency(&self, d1: DeviceId, d2: DeviceId) -> Result<f64> {
        if d1 == d2 {
            return Ok(0.0);
        }
        let (a1, a2) = (self.area_of(d1)?, self.area_of(d2)?);
        let mut latency = self.access_link(d1)?.base_latency() + self.access_link(d2)?.base_latency();
        if a1 != a2 {
            latency +=
                self.areas[a1].backbone().base_latency() + self.areas[a2].backbone().base_latency();
        }
        Ok(latency)
    }

    /// Samples the end-to-end link state between two devices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached endpoint.
    pub fn link_state(
        &self,
        d1: DeviceId,
        d2: DeviceId,
        rng: &mut ChaCha8Rng,
    ) -> Result<LinkState> {
        if d1 == d2 {
            return Ok(LinkState {
                speed: f64::INFINITY,
                latency: 0.0,
                jitter: 0.0,
            });
        }
        let (a1, a2) = (self.area_of(d1)?, self.area_of(d2)?);
        let mut jitter =
            self.access_link(d1)?.sample_jitter(rng) + self.access_link(d2)?.sample_jitter(rng);
        if a1 != a2 {
            jitter += self.areas[a1].backbone().sample_jitter(rng)
                + self.areas[a2].backbone().sample_jitter(rng);
        }
        Ok(LinkState {
            speed: self.link_speed(d1, d2)?,
            latency: self.link_latency(d1, d2)?,
            jitter,
        })
    }

    /// Reserves `bw` MBps symmetrically: both access lines, both backbones
    /// when the endpoints live in different areas, and both device
    /// interface mirrors. The reservation is atomic: feasibility is checked
    /// on every affected line before anything is changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeBandwidth`] when any affected line lacks
    /// the bandwidth, and [`Error::InterfaceMismatch`] when a device mirror
    /// disagrees with its line.
    pub fn reserve_bw(
        &mut self,
        devices: &mut [Device],
        d1: DeviceId,
        d2: DeviceId,
        bw: f64,
    ) -> Result<()> {
        if d1 == d2 || bw == 0.0 {
            return Ok(());
        }
        let (a1, a2) = (self.area_of(d1)?, self.area_of(d2)?);

        for &d in &[d1, d2] {
            let line_bw = self.access_link(d)?.free_bw();
            let device_bw = devices[d].free_bw();
            if !nearly_eq(line_bw, device_bw) {
                return Err(Error::InterfaceMismatch {
                    device: d,
                    line_bw,
                    device_bw,
                });
            }
            if line_bw - bw < -oraas_model::RESOURCE_EPS {
                return Err(Error::NegativeBandwidth {
                    what: "access line",
                    value: line_bw - bw,
                });
            }
        }
        if a1 != a2 {
            for &a in &[a1, a2] {
                let free = self.areas[a].backbone().free_bw();
                if free - bw < -oraas_model::RESOURCE_EPS {
                    return Err(Error::NegativeBandwidth {
                        what: "backbone",
                        value: free - bw,
                    });
                }
            }
        }

        for &d in &[d1, d2] {
            let line = self.access_link_mut(d)?;
            line.apply_bw_delta(bw, "access line")?;
            let free = line.free_bw();
            devices[d].set_free_bw(free);
        }
        if a1 != a2 {
            self.areas[a1].backbone_mut().apply_bw_delta(bw, "backbone")?;
            self.areas[a2].backbone_mut().apply_bw_delta(bw, "backbone")?;
        }
        Ok(())
    }

    /// Releases a reservation made by [`Topology::reserve_bw`].
    ///
    /// # Errors
    ///
    /// Propagates the same errors as a reservation.
    pub fn release_bw(
        &mut self,
        devices: &mut [Device],
        d1: DeviceId,
        d2: DeviceId,
        bw: f64,
    ) -> Result<()> {
        self.reserve_bw(devices, d1, d2, -bw)
    }

    /// Earliest time the path between two devices is free of back-to-back
    /// transfers, ms from slot start. Backbones only participate when the
    /// access watermark is non-zero and the endpoints span areas.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached endpoint.
    pub fn link_occupied_time(&self, d1: DeviceId, d2: DeviceId) -> Result<f64> {
        if d1 == d2 {
            return Ok(0.0);
        }
        let (a1, a2) = (self.area_of(d1)?, self.area_of(d2)?);
        let mut earliest = self
            .access_link(d1)?
            .occupied_time()
            .min(self.access_link(d2)?.occupied_time());
        if earliest > 0.0 && a1 != a2 {
            earliest = earliest
                .min(self.areas[a1].backbone().occupied_time())
                .min(self.areas[a2].backbone().occupied_time());
        }
        Ok(earliest)
    }

    /// Time to push `size` MB between two devices at the current bottleneck
    /// speed, ms.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached endpoint.
    pub fn transmission_duration(&self, d1: DeviceId, d2: DeviceId, size: f64) -> Result<f64> {
        let speed = self.link_speed(d1, d2)?;
        Ok(size / speed.max(1e-6) * 1000.0)
    }

    /// Schedules a transient transfer of `size` MB: it begins when the path
    /// frees up (but not before `min_start`) and pushes the transfer
    /// watermark of every line on the path to its end time. Returns the end
    /// time in ms from slot start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unattached endpoint.
    pub fn transmit(
        &mut self,
        d1: DeviceId,
        d2: DeviceId,
        size: f64,
        min_start: f64,
    ) -> Result<f64> {
        if d1 == d2 {
            return Ok(min_start);
        }
        let begin = self.link_occupied_time(d1, d2)?.max(min_start);
        let end = begin + self.transmission_duration(d1, d2, size)?;

        let (a1, a2) = (self.area_of(d1)?, self.area_of(d2)?);
        self.access_link_mut(d1)?.occupy_until(end);
        self.access_link_mut(d2)?.occupy_until(end);
        if a1 != a2 {
            self.areas[a1].backbone_mut().occupy_until(end);
            self.areas[a2].backbone_mut().occupy_until(end);
        }
        Ok(end)
    }

    /// Slot rollover: clears every transfer watermark.
    pub fn step(&mut self) {
        for area in &mut self.areas {
            area.step();
        }
    }

    /// Sanity check after construction: every device counted once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CensusMismatch`] when the per-area census disagrees
    /// with the attachment map.
    pub fn check_areas(&self) -> Result<()> {
        let mut counted = 0;
        for area in &self.areas {
            if area.devices().is_empty() {
                tracing::debug!(area = area.id, "area has no devices");
            }
            counted += area.devices().len();
        }
        if counted != self.device_to_area.len() {
            return Err(Error::CensusMismatch {
                counted,
                mapped: self.device_to_area.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oraas_model::DeviceKind;
    use rand::SeedableRng;

    fn two_area_setup() -> (Topology, Vec<Device>, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut topology = Topology::new(2, &mut rng);
        let devices = vec![
            Device::server(0, &mut rng),
            Device::client(1, DeviceKind::Desktop, &mut rng),
        ];
        topology.add_device(&devices[0], Some(0), &mut rng).unwrap();
        topology.add_device(&devices[1], Some(1), &mut rng).unwrap();
        topology.check_areas().unwrap();
        (topology, devices, rng)
    }

    #[test]
    fn loopback_link_is_ideal() {
        let (topology, _, mut rng) = two_area_setup();
        let state = topology.link_state(0, 0, &mut rng).unwrap();
        assert!(state.speed.is_infinite());
        assert!(state.latency.abs() < f64::EPSILON);
        assert!(state.jitter.abs() < f64::EPSILON);
    }

    #[test]
    fn cross_area_state_includes_backbones() {
        let (topology, _, mut rng) = two_area_setup();
        let access_only =
            topology.access_link(0).unwrap().base_latency() + topology.access_link(1).unwrap().base_latency();
        let state = topology.link_state(0, 1, &mut rng).unwrap();
        assert!(state.latency > access_only);
        let bottleneck = topology.access_link(0).unwrap().free_bw().min(
            topology.access_link(1).unwrap().free_bw(),
        );
        assert!(state.speed <= bottleneck);
    }

    #[test]
    fn cross_area_reservation_touches_all_four_lines() {
        let (mut topology, mut devices, _) = two_area_setup();
        let before_access0 = topology.access_link(0).unwrap().free_bw();
        let before_access1 = topology.access_link(1).unwrap().free_bw();
        let before_bb0 = topology.areas[0].backbone().free_bw();
        let before_bb1 = topology.areas[1].backbone().free_bw();

        topology.reserve_bw(&mut devices, 0, 1, 4.0).unwrap();
        assert!((topology.access_link(0).unwrap().free_bw() - (before_access0 - 4.0)).abs() < 1e-12);
        assert!((topology.access_link(1).unwrap().free_bw() - (before_access1 - 4.0)).abs() < 1e-12);
        assert!((topology.areas[0].backbone().free_bw() - (before_bb0 - 4.0)).abs() < 1e-12);
        assert!((topology.areas[1].backbone().free_bw() - (before_bb1 - 4.0)).abs() < 1e-12);
        assert!((devices[0].free_bw() - (before_access0 - 4.0)).abs() < 1e-12);

        topology.release_bw(&mut devices, 0, 1, 4.0).unwrap();
        assert!((topology.access_link(0).unwrap().free_bw() - before_access0).abs() < 1e-10);
        assert!((topology.access_link(1).unwrap().free_bw() - before_access1).abs() < 1e-10);
        assert!((topology.areas[0].backbone().free_bw() - before_bb0).abs() < 1e-10);
        assert!((topology.areas[1].backbone().free_bw() - before_bb1).abs() < 1e-10);
        assert!((devices[1].free_bw() - before_access1).abs() < 1e-10);
    }

    #[test]
    fn infeasible_reservation_changes_nothing() {
        let (mut topology, mut devices, _) = two_area_setup();
        let before = topology.access_link(1).unwrap().free_bw();
        let err = topology.reserve_bw(&mut devices, 0, 1, before + 1.0);
        assert!(matches!(err, Err(Error::NegativeBandwidth { .. })));
        assert!((topology.access_link(1).unwrap().free_bw() - before).abs() < 1e-12);
        assert!((devices[1].free_bw() - before).abs() < 1e-12);
    }

    #[test]
    fn transmit_advances_and_step_clears_watermarks() {
        let (mut topology, _, _) = two_area_setup();
        let speed = topology.link_speed(0, 1).unwrap();
        let end = topology.transmit(0, 1, speed, 0.0).unwrap();
        // One speed-worth of data takes one second.
        assert!((end - 1000.0).abs() < 1e-6);
        assert!((topology.link_occupied_time(0, 1).unwrap() - end).abs() < 1e-9);

        // A second transfer queues behind the first.
        let end2 = topology.transmit(0, 1, speed, 0.0).unwrap();
        assert!(end2 > end);

        topology.step();
        assert!(topology.link_occupied_time(0, 1).unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn min_start_defers_a_transfer() {
        let (mut topology, _, _) = two_area_setup();
        let end = topology.transmit(0, 1, 0.0, 250.0).unwrap();
        assert!((end - 250.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_device_is_reported() {
        let (topology, _, _) = two_area_setup();
        assert_eq!(topology.link_speed(0, 9), Err(Error::UnknownDevice(9)));
    }
}
