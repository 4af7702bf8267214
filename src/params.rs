//! Tunables of the controller and their persistence.
//!
//! The live set is one `Copy` struct behind a mutex: readers take a snapshot
//! once per tick and writers replace the whole struct, so a tick never sees a
//! half-updated calibration. [`ParamStore`] adds save/load through an
//! [`NvStorage`] backend (SPI NOR flash on the board).

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::drivers::crc::crc32;
use crate::drivers::model::HeaterParams;
use crate::drivers::pid::PidParams;
use crate::hal::{Calibration, Channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timings {
    /// Rolling average window, samples.
    pub averaging_len: u32,
    /// Control steps per second.
    pub sampling_rate: u32,
    /// ADC samples per second.
    pub oversampling_rate: u32,
}

impl Timings {
    /// Samples taken per control step, at least one.
    pub fn oversampling_ratio(&self) -> u32 {
        (self.oversampling_rate / self.sampling_rate.max(1)).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryParams {
    /// Stop charging at or above this voltage.
    pub v_high: f32,
    /// Resume charging at or below this voltage.
    pub v_low: f32,
    pub t_min: f32,
    pub t_max: f32,
}

impl BatteryParams {
    pub fn temperature_ok(&self, t: f32) -> bool {
        t >= self.t_min && t <= self.t_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Params {
    pub adc: [Calibration; Channel::COUNT],
    pub dac: Calibration,
    pub pid: PidParams,
    pub heater: HeaterParams,
    /// Bridge reference resistor, ohms.
    pub ref_resistance: f32,
    pub timings: Timings,
    pub battery: BatteryParams,
    /// Log PI internals every status period.
    pub pid_debug: bool,
}

const DAC_FULL_SCALE_V: f32 = 6.0;
const DAC_STEPS: f32 = 1024.0;
const CURRENT_SHUNT_OHM: f32 = 2.0;
const CURRENT_AMPLIFICATION: f32 = 2.0;

impl Params {
    pub const DEFAULT: Self = Self {
        adc: [
            // I_h: shunt amplifier, amps
            Calibration::new(1.0 / (CURRENT_SHUNT_OHM * CURRENT_AMPLIFICATION), -0.025_35),
            // V_h_mon: 1:4 divider
            Calibration::new(4.0, 0.067),
            Calibration::IDENTITY,
            Calibration::IDENTITY,
            // Bat_V: 1:2 divider
            Calibration::new(2.0, 0.0),
            // Bat_T: 10 mV/K sensor with 500 mV at 0 C
            Calibration::new(100.0, -50.0),
        ],
        dac: Calibration::new(DAC_STEPS / DAC_FULL_SCALE_V, 0.0),
        pid: PidParams {
            k_i: 0.01,
            lim_i: 100.0,
            k_pe: 0.05,
            k_pd: 0.0,
            setpoint_tolerance: 0.5,
            timing_factor: 0.1,
            ambient_temp: 293.15,
        },
        heater: HeaterParams {
            tempco: 0.0025,
            rt_resistance: 10.0,
            rt_temp: 273.0,
        },
        ref_resistance: 100_000.0,
        timings: Timings {
            averaging_len: 32,
            sampling_rate: 10,
            oversampling_rate: 500,
        },
        battery: BatteryParams {
            v_high: 4.15,
            v_low: 3.95,
            t_min: 0.0,
            t_max: 45.0,
        },
        pid_debug: false,
    };
}

impl Default for Params {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The live parameter set.
pub struct SharedParams {
    live: Mutex<CriticalSectionRawMutex, Cell<Params>>,
}

impl SharedParams {
    pub const fn new() -> Self {
        Self {
            live: Mutex::new(Cell::new(Params::DEFAULT)),
        }
    }

    pub fn get(&self) -> Params {
        self.live.lock(|p| p.get())
    }

    pub fn replace(&self, params: Params) {
        self.live.lock(|p| p.set(params))
    }

    /// Edit a copy and publish it as a whole.
    pub fn modify(&self, f: impl FnOnce(&mut Params)) {
        self.live.lock(|p| {
            let mut next = p.get();
            f(&mut next);
            p.set(next);
        })
    }
}

impl Default for SharedParams {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    Io,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Storage(StorageError),
    /// Stored blob has the wrong magic or checksum.
    Corrupt,
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        StoreError::Storage(e)
    }
}

/// Non-volatile backing store for one parameter blob.
pub trait NvStorage {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;
}

const MAGIC: [u8; 4] = *b"HCP1";
const BODY_LEN: usize = (Channel::COUNT * 2 + 2 + 7 + 3 + 1 + 4) * 4 + 3 * 4 + 1;
/// Size of the persisted blob: magic, fields, CRC-32.
pub const BLOB_LEN: usize = MAGIC.len() + BODY_LEN + 4;

/// Little-endian field cursor over a byte slice.
pub(crate) struct LeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.buf.get(self.pos..self.pos + N) {
            out.copy_from_slice(src);
        }
        self.pos += N;
        out
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub(crate) fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub(crate) fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    pub(crate) fn calibration(&mut self) -> Calibration {
        Calibration::new(self.f32(), self.f32())
    }
}

struct LeWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> LeWriter<'a> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes())
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes())
    }

    fn calibration(&mut self, c: &Calibration) {
        self.f32(c.gain);
        self.f32(c.offset);
    }
}

/// Decoded wire order of `SET_PID_PARAMS`.
pub(crate) fn read_pid(r: &mut LeReader<'_>) -> PidParams {
    PidParams {
        k_i: r.f32(),
        lim_i: r.f32(),
        k_pe: r.f32(),
        k_pd: r.f32(),
        setpoint_tolerance: r.f32(),
        timing_factor: r.f32(),
        ambient_temp: r.f32(),
    }
}

/// Decoded wire order of `SET_HEATER_PARAMS`.
pub(crate) fn read_heater(r: &mut LeReader<'_>) -> HeaterParams {
    HeaterParams {
        tempco: r.f32(),
        rt_resistance: r.f32(),
        rt_temp: r.f32(),
    }
}

pub fn encode(params: &Params) -> [u8; BLOB_LEN] {
    let mut blob = [0u8; BLOB_LEN];
    {
        let mut w = LeWriter { buf: &mut blob, pos: 0 };
        w.put(&MAGIC);
        for cal in &params.adc {
            w.calibration(cal);
        }
        w.calibration(&params.dac);

        let pid = &params.pid;
        for v in [
            pid.k_i,
            pid.lim_i,
            pid.k_pe,
            pid.k_pd,
            pid.setpoint_tolerance,
            pid.timing_factor,
            pid.ambient_temp,
        ] {
            w.f32(v);
        }
        w.f32(params.heater.tempco);
        w.f32(params.heater.rt_resistance);
        w.f32(params.heater.rt_temp);
        w.f32(params.ref_resistance);
        w.u32(params.timings.averaging_len);
        w.u32(params.timings.sampling_rate);
        w.u32(params.timings.oversampling_rate);
        w.f32(params.battery.v_high);
        w.f32(params.battery.v_low);
        w.f32(params.battery.t_min);
        w.f32(params.battery.t_max);
        w.put(&[params.pid_debug as u8]);
    }
    let crc = crc32(&blob[..BLOB_LEN - 4]);
    blob[BLOB_LEN - 4..].copy_from_slice(&crc.to_le_bytes());
    blob
}

pub fn decode(blob: &[u8; BLOB_LEN]) -> Result<Params, StoreError> {
    let (body, crc) = blob.split_at(BLOB_LEN - 4);
    if body[..4] != MAGIC || crc32(body).to_le_bytes() != crc {
        return Err(StoreError::Corrupt);
    }

    let mut r = LeReader::new(&body[4..]);
    let mut adc = [Calibration::IDENTITY; Channel::COUNT];
    for cal in adc.iter_mut() {
        *cal = r.calibration();
    }
    let dac = r.calibration();
    let pid = read_pid(&mut r);
    let heater = read_heater(&mut r);
    let ref_resistance = r.f32();
    let timings = Timings {
        averaging_len: r.u32(),
        sampling_rate: r.u32(),
        oversampling_rate: r.u32(),
    };
    let battery = BatteryParams {
        v_high: r.f32(),
        v_low: r.f32(),
        t_min: r.f32(),
        t_max: r.f32(),
    };
    let pid_debug = r.u8() != 0;

    Ok(Params {
        adc,
        dac,
        pid,
        heater,
        ref_resistance,
        timings,
        battery,
        pid_debug,
    })
}

/// Persistence front end over the live set. Owned by the parser task.
pub struct ParamStore<'a, S: NvStorage> {
    live: &'a SharedParams,
    storage: S,
}

impl<'a, S: NvStorage> ParamStore<'a, S> {
    pub fn new(live: &'a SharedParams, storage: S) -> Self {
        Self { live, storage }
    }

    pub fn params(&self) -> Params {
        self.live.get()
    }

    pub fn adc_calibration(&self, channel: Channel) -> Calibration {
        self.live.get().adc[channel.index()]
    }

    pub fn set_adc_calibration(&self, channel: Channel, cal: Calibration) {
        self.live.modify(|p| p.adc[channel.index()] = cal)
    }

    pub fn dac_calibration(&self) -> Calibration {
        self.live.get().dac
    }

    pub fn set_dac_calibration(&self, cal: Calibration) {
        self.live.modify(|p| p.dac = cal)
    }

    pub fn pid_params(&self) -> PidParams {
        self.live.get().pid
    }

    pub fn set_pid_params(&self, pid: PidParams) {
        self.live.modify(|p| p.pid = pid)
    }

    pub fn heater_params(&self) -> HeaterParams {
        self.live.get().heater
    }

    pub fn set_heater_params(&self, heater: HeaterParams) {
        self.live.modify(|p| p.heater = heater)
    }

    pub fn ref_resistance(&self) -> f32 {
        self.live.get().ref_resistance
    }

    pub fn set_ref_resistance(&self, ohms: f32) {
        self.live.modify(|p| p.ref_resistance = ohms)
    }

    pub fn timings(&self) -> Timings {
        self.live.get().timings
    }

    /// Flips the PI debug flag and returns the new state.
    pub fn toggle_pid_debug(&self) -> bool {
        let mut on = false;
        self.live.modify(|p| {
            p.pid_debug = !p.pid_debug;
            on = p.pid_debug;
        });
        on
    }

    /// Replace the live set with the stored one. A blank or damaged blob
    /// leaves the live set untouched.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let mut blob = [0u8; BLOB_LEN];
        self.storage.read(&mut blob)?;
        let params = decode(&blob)?;
        self.live.replace(params);
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        let blob = encode(&self.live.get());
        self.storage.write(&blob)?;
        Ok(())
    }

    pub fn factory_reset(&mut self) -> Result<(), StoreError> {
        self.live.replace(Params::DEFAULT);
        self.save()
    }

    /// Raw stored blob, as kept by the backend.
    pub fn dump(&mut self, out: &mut [u8; BLOB_LEN]) -> Result<(), StoreError> {
        self.storage.read(out)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// In-memory backend; `fail` makes every access return `Io`.
    pub struct RamStorage {
        pub blob: std::vec::Vec<u8>,
        pub fail: bool,
    }

    impl RamStorage {
        pub fn new() -> Self {
            Self {
                blob: std::vec![0xFF; BLOB_LEN],
                fail: false,
            }
        }
    }

    impl NvStorage for RamStorage {
        fn read(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Io);
            }
            let src = self.blob.get(..buf.len()).ok_or(StorageError::OutOfRange)?;
            buf.copy_from_slice(src);
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Io);
            }
            self.blob.clear();
            self.blob.extend_from_slice(data);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RamStorage;
    use super::*;

    #[test]
    fn save_then_load_restores_edits() {
        let live = SharedParams::new();
        let mut store = ParamStore::new(&live, RamStorage::new());
        store.set_ref_resistance(47_000.0);
        store.set_adc_calibration(Channel::VDiv, Calibration::new(1.01, -0.002));
        store.save().unwrap();

        store.set_ref_resistance(1.0);
        store.load().unwrap();
        assert_eq!(store.ref_resistance(), 47_000.0);
        assert_eq!(
            store.adc_calibration(Channel::VDiv),
            Calibration::new(1.01, -0.002)
        );
    }

    #[test]
    fn blank_flash_keeps_defaults() {
        let live = SharedParams::new();
        let mut store = ParamStore::new(&live, RamStorage::new());
        assert_eq!(store.load(), Err(StoreError::Corrupt));
        assert_eq!(store.params(), Params::DEFAULT);
    }

    #[test]
    fn damaged_blob_is_rejected() {
        let mut blob = encode(&Params::DEFAULT);
        blob[10] ^= 0x01;
        assert_eq!(decode(&blob), Err(StoreError::Corrupt));
    }

    #[test]
    fn factory_reset_persists_defaults() {
        let live = SharedParams::new();
        let mut store = ParamStore::new(&live, RamStorage::new());
        store.set_dac_calibration(Calibration::new(1.0, 3.0));
        store.factory_reset().unwrap();
        assert_eq!(store.dac_calibration(), Params::DEFAULT.dac);

        let mut blob = [0u8; BLOB_LEN];
        store.dump(&mut blob).unwrap();
        assert_eq!(decode(&blob), Ok(Params::DEFAULT));
    }

    #[test]
    fn storage_failure_surfaces() {
        let live = SharedParams::new();
        let mut storage = RamStorage::new();
        storage.fail = true;
        let mut store = ParamStore::new(&live, storage);
        assert_eq!(store.save(), Err(StoreError::Storage(StorageError::Io)));
    }

    #[test]
    fn pid_debug_toggles() {
        let live = SharedParams::new();
        let store = ParamStore::new(&live, RamStorage::new());
        assert!(store.toggle_pid_debug());
        assert!(live.get().pid_debug);
        assert!(!store.toggle_pid_debug());
    }
}
