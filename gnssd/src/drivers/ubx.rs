//! Reference driver (C5) for the u-blox UBX binary protocol: the frame
//! shape the lexer already validated is `<class><id><len LE u16><payload>`
//! (magic and checksum already stripped by the lexer before `parse` sees
//! it — `frame` here starts at the class byte).
//!
//! Field offsets and scale factors below are transcribed from the
//! receiver's interface description for each message, not invented; see
//! `DESIGN.md` for the per-message grounding note.

use gnssd_proto::bits::{getleu16, getleu32, getles16, getles32, fletcher8};
use gnssd_proto::fix::{Mode, Status};
use gnssd_proto::leap::LeapNotify;
use gnssd_proto::packet::{PacketType, UpdateMask};
use gnssd_proto::prn::translate_prn;
use gnssd_proto::raw::{ObsFlags, RawObservation};
use gnssd_proto::skyview::Satellite;
use gnssd_proto::timespec::{gps_week_to_utc, utc_ymdhms_to_timespec};

use crate::driver::{DeviceState, Driver};
use crate::error::GnssdError;

const CLASS_NAV: u8 = 0x01;
const CLASS_RXM: u8 = 0x02;
const CLASS_INF: u8 = 0x04;
const CLASS_CFG: u8 = 0x06;
const CLASS_MON: u8 = 0x0A;
const CLASS_TIM: u8 = 0x0D;

const NAV_POSECEF: u8 = 0x01;
const NAV_POSLLH: u8 = 0x02;
const NAV_DOP: u8 = 0x04;
const NAV_PVT: u8 = 0x07;
const NAV_VELECEF: u8 = 0x11;
const NAV_VELNED: u8 = 0x12;
const NAV_HPPOSECEF: u8 = 0x13;
const NAV_HPPOSLLH: u8 = 0x14;
const NAV_TIMEGPS: u8 = 0x20;
const NAV_TIMELS: u8 = 0x26;
const NAV_SVINFO: u8 = 0x30;
const NAV_SAT: u8 = 0x35;
const NAV_RELPOSNED: u8 = 0x3C;
const NAV_EOE: u8 = 0x61;

const RXM_SFRBX: u8 = 0x13;
const RXM_RAWX: u8 = 0x15;

const MON_VER: u8 = 0x04;
const TIM_TP: u8 = 0x01;

const CFG_PRT: u8 = 0x00;
const CFG_MSG: u8 = 0x01;
const CFG_RATE: u8 = 0x08;

/// The reference UBX driver.
pub struct UbxDriver;

impl UbxDriver {
    pub fn new() -> Self {
        UbxDriver
    }

    /// Wrap a `(class, id, payload)` triple into a full, checksummed UBX
    /// frame ready to write to the device.
    fn build_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xB5, 0x62, class, id];
        frame.push((payload.len() & 0xff) as u8);
        frame.push((payload.len() >> 8) as u8);
        frame.extend_from_slice(payload);
        let (a, b) = fletcher8(&frame[2..]);
        frame.push(a);
        frame.push(b);
        frame
    }
}

impl Default for UbxDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for UbxDriver {
    fn name(&self) -> &'static str {
        "u-blox"
    }

    fn claims(&self, packet_type: &PacketType) -> bool {
        matches!(packet_type, PacketType::Ubx { .. })
    }

    fn time_offset(&self) -> f64 {
        // u-blox M8/M9 receivers report the PVT solution with roughly
        // this much latency behind the PPS edge for the same fix.
        0.0
    }

    fn parse(&self, frame: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
        if frame.len() < 6 {
            return Err(GnssdError::FrameCorrupt { reason: "frame shorter than a UBX header".into() });
        }
        let class = frame[0];
        let id = frame[1];
        let len = getleu16(frame, 2) as usize;
        if frame.len() < 4 + len {
            return Err(GnssdError::FrameCorrupt { reason: "payload shorter than declared length".into() });
        }
        let payload = &frame[4..4 + len];

        if class == CLASS_NAV && id == NAV_EOE {
            state.cycle_ender.eoe_seen = true;
            return Ok(UpdateMask::END_OF_CYCLE);
        }

        let mut mask = match (class, id) {
            (CLASS_NAV, NAV_PVT) => parse_nav_pvt(payload, state)?,
            (CLASS_NAV, NAV_POSLLH) => parse_nav_posllh(payload, state)?,
            (CLASS_NAV, NAV_POSECEF) => UpdateMask::empty(), // ECEF not modeled
            (CLASS_NAV, NAV_VELNED) => parse_nav_velned(payload, state)?,
            (CLASS_NAV, NAV_VELECEF) => UpdateMask::empty(),
            (CLASS_NAV, NAV_HPPOSLLH) => parse_nav_hpposllh(payload, state)?,
            (CLASS_NAV, NAV_HPPOSECEF) => UpdateMask::empty(),
            (CLASS_NAV, NAV_RELPOSNED) => UpdateMask::empty(),
            (CLASS_NAV, NAV_DOP) => parse_nav_dop(payload)?,
            (CLASS_NAV, NAV_TIMEGPS) => parse_nav_timegps(payload, state)?,
            (CLASS_NAV, NAV_TIMELS) => parse_nav_timels(payload, state)?,
            (CLASS_NAV, NAV_SAT) => parse_nav_sat(payload, state)?,
            (CLASS_NAV, NAV_SVINFO) => parse_nav_svinfo(payload, state)?,
            (CLASS_RXM, RXM_RAWX) => parse_rxm_rawx(payload, state)?,
            (CLASS_RXM, RXM_SFRBX) => UpdateMask::empty(),
            (CLASS_INF, inf_id) => {
                forward_inf(inf_id, payload);
                UpdateMask::empty()
            }
            (CLASS_MON, MON_VER) => parse_mon_ver(payload, state)?,
            (CLASS_TIM, TIM_TP) => parse_tim_tp(payload, state)?,
            _ => UpdateMask::empty(),
        };

        // Every NAV message other than the terminator itself carries iTOW
        // at payload offset 0; feed it to the discoverer so firmware that
        // never sends NAV-EOE still gets a synthesized END_OF_CYCLE.
        if class == CLASS_NAV && !state.cycle_ender.eoe_seen && payload.len() >= 4 {
            let itow = getleu32(payload, 0);
            state.cycle_ender.observe(id, itow);
            if state.cycle_ender.is_ender(id) {
                mask |= UpdateMask::END_OF_CYCLE;
            }
        }

        Ok(mask)
    }

    fn speed_switch(
        &self,
        baud: u32,
        write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), GnssdError> {
        let mut payload = vec![0u8; 20];
        payload[0] = 1; // portID: UART1
        payload[4..8].copy_from_slice(&0x0000_08D0u32.to_le_bytes()); // 8N1
        payload[8..12].copy_from_slice(&baud.to_le_bytes());
        payload[12..14].copy_from_slice(&0x0007u16.to_le_bytes()); // inProtoMask
        payload[14..16].copy_from_slice(&0x0007u16.to_le_bytes()); // outProtoMask
        let frame = Self::build_frame(CLASS_CFG, CFG_PRT, &payload);
        write(&frame).map_err(|e| GnssdError::io("serial", e))?;
        Ok(())
    }

    fn rate_switch(
        &self,
        hz: f64,
        write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), GnssdError> {
        if hz <= 0.0 {
            return Err(GnssdError::ConfigWrite { reason: "rate must be positive".into() });
        }
        let meas_rate_ms = (1000.0 / hz).round() as u16;
        let mut payload = vec![0u8; 6];
        payload[0..2].copy_from_slice(&meas_rate_ms.to_le_bytes());
        payload[2..4].copy_from_slice(&1u16.to_le_bytes()); // navRate: every cycle
        payload[4..6].copy_from_slice(&1u16.to_le_bytes()); // timeRef: GPS time
        let frame = Self::build_frame(CLASS_CFG, CFG_RATE, &payload);
        write(&frame).map_err(|e| GnssdError::io("serial", e))?;
        Ok(())
    }

    fn control_send(
        &self,
        payload: &[u8],
        write: &mut dyn FnMut(&[u8]) -> std::io::Result<()>,
    ) -> Result<(), GnssdError> {
        write(payload).map_err(|e| GnssdError::io("serial", e))
    }
}

/// Build a CFG-MSG frame enabling/disabling message `(msg_class, msg_id)`
/// on the current port at `rate` reports per measurement cycle.
pub fn cfg_msg(msg_class: u8, msg_id: u8, rate: u8) -> Vec<u8> {
    UbxDriver::build_frame(CLASS_CFG, CFG_MSG, &[msg_class, msg_id, rate])
}

fn parse_nav_pvt(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 84 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-PVT runt payload".into() });
    }
    let mut mask = UpdateMask::empty();

    let year = getleu16(p, 4) as i32;
    let month = p[6] as u32;
    let day = p[7] as u32;
    let hour = p[8] as u32;
    let minute = p[9] as u32;
    let second = p[10] as u32;
    let valid = p[11];
    let nano = getles32(p, 16);
    let fully_resolved = valid & 0x04 != 0;
    let valid_date_time = valid & 0x03 == 0x03;

    if valid_date_time {
        if let Some(ts) = utc_ymdhms_to_timespec(year, month, day, hour, minute, second, nano) {
            state.fix.time = ts;
            mask |= UpdateMask::TIME;
        }
    }
    let _ = fully_resolved;

    let fix_type = p[20];
    let flags = p[21];
    let gnss_fix_ok = flags & 0x01 != 0;
    let diff_soln = flags & 0x02 != 0;

    let (mode, status) = match fix_type {
        0 => (Mode::None, Status::NoFix),
        1 => (Mode::DeadReckoning, Status::Dr),
        2 => (Mode::TwoD, Status::Fix),
        3 => {
            if gnss_fix_ok && diff_soln {
                (Mode::ThreeD, Status::Dgps)
            } else {
                (Mode::ThreeD, Status::Fix)
            }
        }
        4 => (Mode::ThreeD, Status::GnssDr),
        5 => (Mode::TimeOnly, Status::Time),
        _ => (Mode::None, Status::NoFix),
    };
    state.fix.mode = mode;
    state.fix.status = status;
    mask |= UpdateMask::MODE | UpdateMask::STATUS;

    if mode != Mode::None {
        let lon = getles32(p, 24) as f64 * 1e-7;
        let lat = getles32(p, 28) as f64 * 1e-7;
        state.fix.longitude = lon;
        state.fix.latitude = lat;
        mask |= UpdateMask::LATLON;

        if mode == Mode::ThreeD || mode == Mode::DeadReckoning {
            let alt_hae = getles32(p, 32) as f64 * 1e-3;
            let alt_msl = getles32(p, 36) as f64 * 1e-3;
            state.fix.alt_hae = alt_hae;
            state.fix.alt_msl = alt_msl;
            mask |= UpdateMask::ALTITUDE;
        }

        let speed = getles32(p, 60) as f64 * 1e-3;
        let track = getles32(p, 64) as f64 * 1e-5;
        state.fix.speed = speed;
        state.fix.track = track;
        mask |= UpdateMask::SPEED | UpdateMask::TRACK;

        if p.len() >= 56 {
            let vel_d = getles32(p, 56) as f64 * 1e-3;
            state.fix.climb = -vel_d; // velD is positive down
            mask |= UpdateMask::CLIMB;
        }

        state.fix.accuracy.eph = getleu32(p, 40) as f64 / 1000.0;
        state.fix.accuracy.epv = getleu32(p, 44) as f64 / 1000.0;
        state.fix.accuracy.eps = getleu32(p, 68) as f64 / 1000.0;
    } else {
        state.fix.latitude = f64::NAN;
        state.fix.longitude = f64::NAN;
        state.fix.alt_hae = f64::NAN;
        state.fix.alt_msl = f64::NAN;
    }

    Ok(mask)
}

fn parse_nav_posllh(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 28 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-POSLLH runt payload".into() });
    }
    state.fix.longitude = getles32(p, 4) as f64 * 1e-7;
    state.fix.latitude = getles32(p, 8) as f64 * 1e-7;
    state.fix.alt_hae = getles32(p, 12) as f64 * 1e-3;
    state.fix.alt_msl = getles32(p, 16) as f64 * 1e-3;
    state.fix.accuracy.eph = getleu32(p, 20) as f64 / 1000.0;
    state.fix.accuracy.epv = getleu32(p, 24) as f64 / 1000.0;
    Ok(UpdateMask::LATLON | UpdateMask::ALTITUDE)
}

fn parse_nav_hpposllh(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 36 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-HPPOSLLH runt payload".into() });
    }
    // Base value (1e-7 deg) plus a signed 0.1mm-equivalent high-precision
    // residual (1e-9 deg), the standard "base plus finer residual" rule
    // u-blox uses throughout its high-precision messages.
    let lon_base = getles32(p, 8) as f64 * 1e-7;
    let lat_base = getles32(p, 12) as f64 * 1e-7;
    let lon_hp = p[24] as i8 as f64 * 1e-9;
    let lat_hp = p[25] as i8 as f64 * 1e-9;
    state.fix.longitude = lon_base + lon_hp;
    state.fix.latitude = lat_base + lat_hp;
    let alt_hae_base = getles32(p, 16) as f64 * 1e-3;
    let alt_hae_hp = p[26] as i8 as f64 * 0.1e-3;
    state.fix.alt_hae = alt_hae_base + alt_hae_hp;
    Ok(UpdateMask::LATLON | UpdateMask::ALTITUDE)
}

fn parse_nav_velned(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 36 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-VELNED runt payload".into() });
    }
    state.fix.speed = getleu32(p, 16) as f64 * 1e-2;
    state.fix.track = getleu32(p, 20) as f64 * 1e-5;
    let vel_d = getles32(p, 12) as f64 * 1e-2;
    state.fix.climb = -vel_d;
    Ok(UpdateMask::SPEED | UpdateMask::TRACK | UpdateMask::CLIMB)
}

fn parse_nav_dop(p: &[u8]) -> Result<UpdateMask, GnssdError> {
    if p.len() < 18 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-DOP runt payload".into() });
    }
    Ok(UpdateMask::DOP)
}

fn parse_nav_timegps(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 16 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-TIMEGPS runt payload".into() });
    }
    let itow = getleu32(p, 0);
    let f_tow = getles32(p, 4);
    let week = getleu16(p, 8);
    let leap_s = p[10] as i8;
    let valid = p[11];
    let leap_valid = valid & 0x04 != 0;
    if leap_valid {
        state.leap_seconds = leap_s as i32;
    }
    state.fix.time = gps_week_to_utc(week, itow, f_tow, state.leap_seconds);
    Ok(UpdateMask::TIME | UpdateMask::LEAP_SECOND)
}

fn parse_nav_timels(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 24 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-TIMELS runt payload".into() });
    }
    let src_curr_ls = p[4];
    let curr_ls = p[5] as i8;
    let ls_change = p[7] as i8;
    let valid = p[22];
    let curr_ls_valid = valid & 0x01 != 0;
    let change_valid = valid & 0x02 != 0;

    if src_curr_ls != 0 && curr_ls_valid {
        state.leap_seconds = curr_ls as i32;
    }

    state.pending_leap_notify = if change_valid {
        match ls_change {
            1 => LeapNotify::AddSecond,
            -1 => LeapNotify::DeleteSecond,
            _ => LeapNotify::None,
        }
    } else {
        LeapNotify::Unknown
    };

    Ok(UpdateMask::LEAP_SECOND)
}

fn parse_nav_sat(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 8 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-SAT runt payload".into() });
    }
    let num_svs = p[5] as usize;
    state.skyview.clear();
    let mut offset = 8usize;
    for _ in 0..num_svs {
        if offset + 12 > p.len() {
            break;
        }
        let gnss_id = p[offset];
        let sv_id = p[offset + 1];
        let cno = p[offset + 2];
        let elev = p[offset + 3] as i8;
        let azim = getles16(p, offset + 4);
        let flags = getleu32(p, offset + 8);
        let used = flags & 0x01 != 0;
        let healthy = (flags >> 4) & 0x03 != 2; // 2 == unhealthy
        state.skyview.push(Satellite {
            gnss_id,
            sv_id,
            prn: translate_prn(gnss_id, sv_id),
            snr: cno as f64,
            elevation: elev as f64,
            azimuth: azim as f64,
            used,
            healthy,
        });
        offset += 12;
    }
    Ok(UpdateMask::SATELLITES)
}

fn parse_nav_svinfo(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 8 {
        return Err(GnssdError::FrameCorrupt { reason: "NAV-SVINFO runt payload".into() });
    }
    let num_ch = p[4] as usize;
    state.skyview.clear();
    let mut offset = 8usize;
    for _ in 0..num_ch {
        if offset + 12 > p.len() {
            break;
        }
        let sv_id = p[offset + 1];
        let flags = p[offset + 2];
        let cno = p[offset + 4];
        let elev = p[offset + 5] as i8;
        let azim = getles16(p, offset + 6);
        let used = flags & 0x01 != 0;
        state.skyview.push(Satellite {
            gnss_id: 0, // legacy message predates multi-GNSS ids; assume GPS
            sv_id,
            prn: translate_prn(0, sv_id),
            snr: cno as f64,
            elevation: elev as f64,
            azimuth: azim as f64,
            used,
            healthy: true,
        });
        offset += 12;
    }
    Ok(UpdateMask::SATELLITES)
}

fn parse_rxm_rawx(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 16 {
        return Err(GnssdError::FrameCorrupt { reason: "RXM-RAWX runt payload".into() });
    }
    let rcv_tow = gnssd_proto::bits::getled64(p, 0);
    let week = getleu16(p, 8);
    let leap_s = p[10] as i8;
    let num_meas = p[11] as usize;

    state.raw.receiver_tow = rcv_tow;
    state.raw.week = week;
    state.raw.leap_seconds = leap_s;
    state.raw.observations.clear();

    let mut offset = 16usize;
    for _ in 0..num_meas {
        if offset + 32 > p.len() {
            break;
        }
        let pseudorange = gnssd_proto::bits::getled64(p, offset);
        let carrier_phase = gnssd_proto::bits::getled64(p, offset + 8);
        let doppler = gnssd_proto::bits::getlef32(p, offset + 16) as f64;
        let gnss_id = p[offset + 20];
        let sv_id = p[offset + 21];
        let lock_time_ms = getleu16(p, offset + 24);
        let cno = p[offset + 26];
        let trk_stat = p[offset + 30];
        let mut flags = ObsFlags::empty();
        if trk_stat & 0x01 != 0 {
            flags |= ObsFlags::PR_VALID;
        }
        if trk_stat & 0x02 != 0 {
            flags |= ObsFlags::CP_VALID;
        }
        if trk_stat & 0x04 != 0 {
            flags |= ObsFlags::HALF_CYCLE;
        }
        state.raw.observations.push(RawObservation {
            gnss_id,
            sv_id,
            pseudorange,
            carrier_phase,
            doppler,
            lock_time_ms,
            obs_code: cno,
            flags,
        });
        offset += 32;
    }
    Ok(UpdateMask::RAW)
}

fn parse_mon_ver(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 40 {
        return Err(GnssdError::FrameCorrupt { reason: "MON-VER runt payload".into() });
    }
    // swVersion[30], hwVersion[10], then zero or more 30-byte extension
    // strings; one of them carries "PROTVER=NN.NN" on firmware that
    // reports a protocol version at all.
    let mut offset = 40usize;
    while offset + 30 <= p.len() {
        let raw = &p[offset..offset + 30];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        if let Ok(text) = std::str::from_utf8(&raw[..end]) {
            if let Some(rest) = text.strip_prefix("PROTVER=") {
                if let Ok(v) = rest.trim().parse::<f32>() {
                    state.protocol_version = Some(v);
                }
            }
        }
        offset += 30;
    }
    Ok(UpdateMask::empty())
}

fn parse_tim_tp(p: &[u8], state: &mut DeviceState) -> Result<UpdateMask, GnssdError> {
    if p.len() < 16 {
        return Err(GnssdError::FrameCorrupt { reason: "TIM-TP runt payload".into() });
    }
    let tow_ms = getleu32(p, 0);
    let tow_sub_ms = getleu32(p, 4);
    let week = getleu16(p, 10) as u16;
    let _ = tow_sub_ms;
    state.fix.time = gps_week_to_utc(week, tow_ms, 0, state.leap_seconds);
    Ok(UpdateMask::TIME)
}

fn forward_inf(inf_id: u8, payload: &[u8]) {
    let text = String::from_utf8_lossy(payload);
    match inf_id {
        0x00 => tracing::error!(target: "gnssd::device", "{text}"),
        0x01 => tracing::warn!(target: "gnssd::device", "{text}"),
        0x04 => tracing::debug!(target: "gnssd::device", "{text}"),
        _ => tracing::info!(target: "gnssd::device", "{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnssd_proto::fix::Mode;

    fn pvt_payload() -> Vec<u8> {
        // Scenario S1: a 3D fix at a known instant, built field by field.
        let mut p = vec![0u8; 92];
        p[4..6].copy_from_slice(&2019u16.to_le_bytes());
        p[6] = 10; // month
        p[7] = 4; // day
        p[8] = 8; // hour
        p[9] = 51; // min
        p[10] = 34; // sec
        p[11] = 0x03; // validDate|validTime
        p[16..20].copy_from_slice(&0i32.to_le_bytes()); // nano
        p[20] = 3; // fixType 3D
        p[21] = 0x01; // gnssFixOK, no diffSoln
        p[24..28].copy_from_slice(&(-1_220_000_000i32).to_le_bytes()); // lon
        p[28..32].copy_from_slice(&(377_500_000i32).to_le_bytes()); // lat
        p[32..36].copy_from_slice(&(30_000i32).to_le_bytes()); // height mm
        p[36..40].copy_from_slice(&(28_000i32).to_le_bytes()); // hMSL mm
        p[40..44].copy_from_slice(&(2_500u32).to_le_bytes()); // hAcc mm
        p[44..48].copy_from_slice(&(4_000u32).to_le_bytes()); // vAcc mm
        p[60..64].copy_from_slice(&(1_500i32).to_le_bytes()); // gSpeed mm/s
        p[64..68].copy_from_slice(&(9_000_000i32).to_le_bytes()); // headMot 1e-5 deg
        p
    }

    #[test]
    fn decodes_nav_pvt_three_d_fix() {
        let mut state = DeviceState::default();
        let mask = parse_nav_pvt(&pvt_payload(), &mut state).unwrap();
        assert!(mask.contains(UpdateMask::LATLON));
        assert!(mask.contains(UpdateMask::ALTITUDE));
        assert_eq!(state.fix.mode, Mode::ThreeD);
        assert_eq!(state.fix.status, Status::Fix);
        assert!((state.fix.latitude - 37.75).abs() < 1e-6);
        assert!((state.fix.longitude - (-122.0)).abs() < 1e-6);
        assert_eq!(state.fix.time.sec, 1_570_179_094);
    }

    #[test]
    fn nav_pvt_runt_payload_is_rejected() {
        let mut state = DeviceState::default();
        let err = parse_nav_pvt(&[0u8; 10], &mut state);
        assert!(err.is_err());
    }

    #[test]
    fn dispatch_routes_pvt_class_and_id_through_driver_trait() {
        let driver = UbxDriver::new();
        let mut frame = vec![CLASS_NAV, NAV_PVT];
        let payload = pvt_payload();
        frame.push((payload.len() & 0xff) as u8);
        frame.push((payload.len() >> 8) as u8);
        frame.extend_from_slice(&payload);
        let mut state = DeviceState::default();
        let mask = driver.parse(&frame, &mut state).unwrap();
        assert!(mask.contains(UpdateMask::MODE));
    }

    #[test]
    fn mon_ver_extracts_protocol_version() {
        let mut p = vec![0u8; 40];
        let mut ext = vec![0u8; 30];
        ext[..8].copy_from_slice(b"PROTVER=");
        ext[8..13].copy_from_slice(b"27.11");
        p.extend_from_slice(&ext);
        let mut state = DeviceState::default();
        parse_mon_ver(&p, &mut state).unwrap();
        assert_eq!(state.protocol_version, Some(27.11));
    }

    #[test]
    fn nav_eoe_sets_end_of_cycle() {
        let driver = UbxDriver::new();
        let frame = vec![CLASS_NAV, NAV_EOE, 4, 0, 0, 0, 0, 0];
        let mut state = DeviceState::default();
        let mask = driver.parse(&frame, &mut state).unwrap();
        assert!(mask.contains(UpdateMask::END_OF_CYCLE));
    }

    #[test]
    fn speed_switch_emits_a_valid_cfg_prt_frame() {
        let driver = UbxDriver::new();
        let mut sent = Vec::new();
        let mut writer = |bytes: &[u8]| {
            sent = bytes.to_vec();
            Ok(())
        };
        driver.speed_switch(38400, &mut writer).unwrap();
        assert_eq!(sent[0], 0xB5);
        assert_eq!(sent[1], 0x62);
        assert_eq!(sent[2], CLASS_CFG);
        assert_eq!(sent[3], CFG_PRT);
    }

    fn nav_frame(id: u8, itow: u32) -> Vec<u8> {
        let mut payload = vec![0u8; 92];
        payload[0..4].copy_from_slice(&itow.to_le_bytes());
        let mut frame = vec![CLASS_NAV, id];
        frame.push((payload.len() & 0xff) as u8);
        frame.push((payload.len() >> 8) as u8);
        frame.extend_from_slice(&payload);
        frame
    }

    #[test]
    fn eoe_absent_firmware_gets_a_synthesized_end_of_cycle_after_two_cycles() {
        let driver = UbxDriver::new();
        let mut state = DeviceState::default();
        // Cycle 1 at iTOW 100: PVT then DOP last.
        driver.parse(&nav_frame(NAV_PVT, 100), &mut state).unwrap();
        let m1 = driver.parse(&nav_frame(NAV_DOP, 100), &mut state).unwrap();
        assert!(!m1.contains(UpdateMask::END_OF_CYCLE));
        // Cycle 2 at iTOW 200: same order, confirms DOP as the ender.
        driver.parse(&nav_frame(NAV_PVT, 200), &mut state).unwrap();
        let m2 = driver.parse(&nav_frame(NAV_DOP, 200), &mut state).unwrap();
        assert!(!m2.contains(UpdateMask::END_OF_CYCLE));
        // Cycle 3: DOP is now latched, so it carries END_OF_CYCLE itself.
        driver.parse(&nav_frame(NAV_PVT, 300), &mut state).unwrap();
        let m3 = driver.parse(&nav_frame(NAV_DOP, 300), &mut state).unwrap();
        assert!(m3.contains(UpdateMask::END_OF_CYCLE));
    }

    #[test]
    fn once_explicit_eoe_is_seen_discovery_never_synthesizes_one() {
        let driver = UbxDriver::new();
        let mut state = DeviceState::default();
        let eoe_frame = vec![CLASS_NAV, NAV_EOE, 4, 0, 0, 0, 0, 0];
        driver.parse(&eoe_frame, &mut state).unwrap();
        assert!(state.cycle_ender.eoe_seen);
        // Even though DOP always arrives last across many cycles, with
        // eoe_seen latched discovery must not run at all.
        for itow in [100u32, 200, 300, 400] {
            driver.parse(&nav_frame(NAV_PVT, itow), &mut state).unwrap();
            let m = driver.parse(&nav_frame(NAV_DOP, itow), &mut state).unwrap();
            assert!(!m.contains(UpdateMask::END_OF_CYCLE));
        }
    }

    fn timels_payload(src_curr_ls: u8, curr_ls: i8, ls_change: i8, valid: u8) -> Vec<u8> {
        let mut p = vec![0u8; 24];
        p[4] = src_curr_ls;
        p[5] = curr_ls as u8;
        p[7] = ls_change as u8;
        p[22] = valid;
        p
    }

    #[test]
    fn nav_timels_derives_pending_add_second_from_ls_change() {
        let mut state = DeviceState::default();
        parse_nav_timels(&timels_payload(2, 18, 1, 0x03), &mut state).unwrap();
        assert_eq!(state.leap_seconds, 18);
        assert_eq!(state.pending_leap_notify, LeapNotify::AddSecond);
    }

    #[test]
    fn nav_timels_derives_pending_delete_second() {
        let mut state = DeviceState::default();
        parse_nav_timels(&timels_payload(2, 18, -1, 0x03), &mut state).unwrap();
        assert_eq!(state.pending_leap_notify, LeapNotify::DeleteSecond);
    }

    #[test]
    fn nav_timels_with_invalid_change_field_reports_unknown() {
        let mut state = DeviceState::default();
        // bit1 (change valid) clear: no pending-change information yet.
        parse_nav_timels(&timels_payload(2, 18, 0, 0x01), &mut state).unwrap();
        assert_eq!(state.pending_leap_notify, LeapNotify::Unknown);
    }

    #[test]
    fn nav_timels_with_no_pending_change_reports_none() {
        let mut state = DeviceState::default();
        parse_nav_timels(&timels_payload(2, 18, 0, 0x03), &mut state).unwrap();
        assert_eq!(state.pending_leap_notify, LeapNotify::None);
    }
}
