// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Intel CSME firmware event decoding. The Converged Security and
//! Management Engine measures its own firmware components into extend
//! registers and reports them to the host as vendor-tagged events on
//! PCR 0-3. Three payload signatures exist: the measurement log, the
//! firmware info record and the AMT configuration record.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::HashAlg;

pub const SIG_MEASUREMENT: &[u8; 20] = b"IntelCSxEEvent01\0\0\0\0";
pub const SIG_INFO: &[u8; 20] = b"IntelCSxEInfoEvent\0\0";
pub const SIG_CONFIG: &[u8; 20] = b"IntelCSMEAmtConfig\0\0";

// Tagged event data types.
pub const INITIALIZE_MANIFEST: u8 = 0;
pub const EXTEND_MANIFEST: u8 = 1;
pub const MANIFEST_VERSION: u8 = 2;
pub const CONFIGURATION_DATA: u8 = 3;

// Measured entity IDs for manifest events.
pub const PMC_MANIFEST: u8 = 2;
pub const INTEL_RBE_MANIFEST: u8 = 3;
pub const ROT_KEY_MANIFEST: u8 = 5;
pub const TCSS_IOM_MANIFEST: u8 = 6;
pub const TCSS_PHY_MANIFEST: u8 = 7;
pub const TCSS_TBT_MANIFEST: u8 = 8;
pub const SYNOPSIS_PHY_MANIFEST: u8 = 13;
pub const PCHC_MANIFEST: u8 = 14;
pub const IDLM_MANIFEST: u8 = 15;
pub const ISI_INTEL_MANIFEST: u8 = 16;
pub const SAM_FIRMWARE_MANIFEST: u8 = 17;
pub const SAM_PHY_MANIFEST: u8 = 18;
pub const IUNIT_BOOT_LOADER_MANIFEST: u8 = 33;
pub const AUDIO_DSP_EXT_ROM: u8 = 35;
pub const OEM_ISH_MANIFEST: u8 = 41;
pub const OEM_KEY_MANIFEST: u8 = 45;
pub const ISI_OEM_MANIFEST: u8 = 58;
pub const ESE: u8 = 192;
pub const DMU: u8 = 193;
pub const PUNIT: u8 = 194;
pub const ESE_XX: u8 = 195;
pub const SOC_PMC: u8 = 196;
pub const SOC_FIRMWARE: u8 = 197;
pub const SOC_SYNOPSIS_PHY: u8 = 198;

// Measured entity IDs for configuration data events.
pub const SECURITY_PARAMETERS: u8 = 0;
pub const OEM_ENABLED_CAPABILITIES: u8 = 2;
pub const OPERATION_MODE_ID: u8 = 3;
pub const SKU_INFORMATION: u8 = 4;

// Manifest verification status.
pub const VERIFICATION_FAILED: u8 = 1;
pub const VERIFICATION_PASSED: u8 = 2;
pub const VERIFICATION_NOT_SIGNED: u8 = 3;
pub const VERIFICATION_SKIPPED: u8 = 4;

#[derive(Error, Debug)]
pub enum CsmeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("tagged event is larger than available data: {0} > {1}")]
    TruncatedEvent(u32, usize),
    #[error("configuration record too short: {0} bytes")]
    ConfigTooShort(u32),
}

/// CSME operation mode as measured in the configuration data event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[default]
    Normal,
    Debug,
    SoftDisable,
    HdaSdoDisable,
    Refurbishing,
    EnhancedDebug,
    Unknown,
}

impl From<u8> for OperationMode {
    fn from(mode: u8) -> OperationMode {
        match mode {
            0 => OperationMode::Normal,
            2 => OperationMode::Debug,
            3 => OperationMode::SoftDisable,
            4 => OperationMode::HdaSdoDisable,
            5 => OperationMode::Refurbishing,
            7 => OperationMode::EnhancedDebug,
            _ => OperationMode::Unknown,
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationMode::Normal => "normal",
            OperationMode::Debug => "debug",
            OperationMode::SoftDisable => "soft disable",
            OperationMode::HdaSdoDisable => "HDA_SDO disable",
            OperationMode::Refurbishing => "disabled for refurbishing",
            OperationMode::EnhancedDebug => "enhanced debug",
            OperationMode::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Returns the display name of a measured entity for a given event data
/// type.
pub fn measured_entity_name(data_type: u8, entity: u8) -> String {
    match data_type {
        0..=2 => match entity {
            PMC_MANIFEST => return "PMC Manifest".into(),
            INTEL_RBE_MANIFEST => return "Intel RBE Manifest".into(),
            ROT_KEY_MANIFEST => return "ROT Key Manifest".into(),
            TCSS_IOM_MANIFEST => return "TCSS IOM Manifest".into(),
            TCSS_PHY_MANIFEST => return "TCSS Phy Manifest".into(),
            TCSS_TBT_MANIFEST => return "TCSS TBT Manifest".into(),
            SYNOPSIS_PHY_MANIFEST => {
                return "Synopsis Phys Manifest".into()
            }
            PCHC_MANIFEST => return "PCHC Manifest".into(),
            IDLM_MANIFEST => return "IDLM Manifest".into(),
            ISI_INTEL_MANIFEST => return "ISI Intel Manifest".into(),
            SAM_FIRMWARE_MANIFEST => return "SAM firmware Manifest".into(),
            SAM_PHY_MANIFEST => return "SAM Phy Manifest".into(),
            IUNIT_BOOT_LOADER_MANIFEST => {
                return "IUNIT Boot Loader Manifest".into()
            }
            AUDIO_DSP_EXT_ROM => return "Audio DSP ROM Extension".into(),
            OEM_ISH_MANIFEST => return "OEM ISH Manifest".into(),
            OEM_KEY_MANIFEST => return "OEM Key Manifest".into(),
            ISI_OEM_MANIFEST => return "ISI OEM Manifest".into(),
            ESE => return "ESE".into(),
            DMU => return "DMU".into(),
            PUNIT => return "PUNIT".into(),
            ESE_XX => return "ESE++".into(),
            SOC_PMC => return "SOC PMC".into(),
            SOC_FIRMWARE => return "SOC Firmware".into(),
            SOC_SYNOPSIS_PHY => return "SOC Synopsis Phy".into(),
            _ => {}
        },
        3 => match entity {
            0 => return "CSME Security Parameters".into(),
            2 => return "CSME OEM enabled capabilities".into(),
            3 => return "CSME Operation Mode".into(),
            _ => {}
        },
        _ => {}
    }
    format!("Unknown entity {entity} for event type {data_type}")
}

/// Decodes the FWCAPS feature state bitmask into feature names.
pub fn features(bits: u32) -> Vec<String> {
    const NAMES: &[(u32, &str)] = &[
        (0, "Full network manageability"),
        (1, "Standard network manageability"),
        (2, "Manageability"),
        (4, "Intel Integrated Touch"),
        (5, "Anti-Theft Technology"),
        (6, "Capability Licensing Service"),
        (7, "Virtualization Engine"),
        (10, "Intel Sensor Hub"),
        (11, "ICC"),
        (12, "Protected Audio Video Path"),
        (16, "High Assurance Platform"),
        (17, "IPv6"),
        (18, "KVM Remote Control"),
        (20, "Dynamic Application Loader"),
        (21, "Cipher Transport Layer"),
        (23, "Wireless Lan"),
        (24, "Wireless Display"),
        (25, "USB 3.0"),
        (29, "Platform Trust Technology"),
        (31, "NFC"),
    ];
    NAMES
        .iter()
        .filter(|(bit, _)| (bits >> bit) & 1 != 0)
        .map(|(_, name)| (*name).to_owned())
        .collect()
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub struct ManifestVersion {
    pub version: [u16; 4],
    pub tcb_svn: u32,
    pub arb_svn: u32,
    pub vcn: u32,
    pub verification_status: u8,
    pub manifest_identifier: u8,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub struct SecurityParameters {
    pub soc_config_lock_fuse: bool,
    pub end_of_manufacturing: bool,
    pub manageability_hardware_disabled: bool,
    pub boot_source: u8,
    pub spi_region_write_locked: bool,
    pub spi_descriptor_locked: bool,
    pub rpmc_enabled: bool,
}

/// One decoded entry of the CSME measurement log.
#[derive(Debug, Clone, PartialEq)]
pub struct CsmeEvent {
    pub data_type: u8,
    pub entity: u8,
    pub data: Vec<u8>,
    pub payload: CsmePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CsmePayload {
    InitializeManifest,
    ExtendManifest,
    ManifestVersion(ManifestVersion),
    SecurityParameters(SecurityParameters),
    OemCapabilities(Vec<String>),
    OperationMode(OperationMode),
    SkuInformation(u8),
    Opaque,
}

/// The decoded measurement log from an EV_NONHOST_INFO event, covering
/// one extend register.
#[derive(Debug, Clone)]
pub struct FirmwareMeasurements {
    /// Hash bank of the extend register, when recognised.
    pub er_alg: Option<HashAlg>,
    pub events: Vec<CsmeEvent>,
}

/// Firmware identity and state flags from the info record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub struct FirmwareInfo {
    pub version: u32,
    pub vendor_id: u16,
    pub device_id: u16,
    pub hardware_rot: bool,
    pub invalid_state: bool,
    pub untrusted_measurement: bool,
    pub invalid_measurement: bool,
    pub log_unavailable: bool,
    pub fdo_invalid_measurement: bool,
}

/// AMT provisioning state from the configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AmtConfig {
    pub amt_globally_enabled: bool,
    pub mebx_power_set: bool,
    pub amt_provisioned: bool,
    pub amt_provisioning_mode: String,
    pub zero_touch: bool,
    pub kvm: bool,
    pub serial_over_lan: bool,
    pub usb_redirect: bool,
    pub secure_pki_suffix: String,
    pub certificate_hash_algorithm: u32,
    #[serde(with = "serde_bytes_hex")]
    pub certificate_hash: Vec<u8>,
}

mod serde_bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        v: &[u8],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

fn read_signature(
    cur: &mut Cursor<&[u8]>,
    want: &[u8; 20],
) -> Result<(), CsmeError> {
    let mut sig = [0u8; 20];
    cur.read_exact(&mut sig)
        .map_err(|_| CsmeError::InvalidSignature)?;
    if &sig != want {
        return Err(CsmeError::InvalidSignature);
    }
    Ok(())
}

/// Parses one tagged sub-event of the measurement log.
fn parse_tagged_event(
    cur: &mut Cursor<&[u8]>,
) -> Result<CsmeEvent, CsmeError> {
    let data_type = cur.read_u8()?;
    let entity = cur.read_u8()?;
    let _reserved = cur.read_u16::<LittleEndian>()?;
    let size = cur.read_u32::<LittleEndian>()?;
    let remaining = cur
        .get_ref()
        .len()
        .saturating_sub(cur.position() as usize);
    if size as usize > remaining {
        return Err(CsmeError::TruncatedEvent(size, remaining));
    }
    let mut data = vec![0u8; size as usize];
    cur.read_exact(&mut data)?;

    let payload = match data_type {
        INITIALIZE_MANIFEST => CsmePayload::InitializeManifest,
        EXTEND_MANIFEST => CsmePayload::ExtendManifest,
        MANIFEST_VERSION if data.len() >= 22 => {
            let mut rd = Cursor::new(data.as_slice());
            let mut version = [0u16; 4];
            for v in version.iter_mut() {
                *v = rd.read_u16::<LittleEndian>()?;
            }
            CsmePayload::ManifestVersion(ManifestVersion {
                version,
                tcb_svn: rd.read_u32::<LittleEndian>()?,
                arb_svn: rd.read_u32::<LittleEndian>()?,
                vcn: rd.read_u32::<LittleEndian>()?,
                verification_status: rd.read_u8()?,
                manifest_identifier: rd.read_u8()?,
            })
        }
        CONFIGURATION_DATA => match (entity, data.len()) {
            (SECURITY_PARAMETERS, 4) => {
                let flags = u32::from_le_bytes(
                    data.as_slice().try_into().unwrap_or_default(),
                );
                CsmePayload::SecurityParameters(SecurityParameters {
                    soc_config_lock_fuse: flags & 1 != 0,
                    end_of_manufacturing: (flags >> 1) & 1 != 0,
                    manageability_hardware_disabled: (flags >> 2) & 1 != 0,
                    boot_source: ((flags >> 3) & 1) as u8,
                    spi_region_write_locked: (flags >> 4) & 1 != 0,
                    spi_descriptor_locked: (flags >> 5) & 1 != 0,
                    rpmc_enabled: (flags >> 6) & 1 != 0,
                })
            }
            (OEM_ENABLED_CAPABILITIES, 4) => {
                let flags = u32::from_le_bytes(
                    data.as_slice().try_into().unwrap_or_default(),
                );
                CsmePayload::OemCapabilities(features(flags))
            }
            (OPERATION_MODE_ID, 1) => {
                CsmePayload::OperationMode(OperationMode::from(data[0]))
            }
            (SKU_INFORMATION, 1) => CsmePayload::SkuInformation(data[0]),
            _ => CsmePayload::Opaque,
        },
        _ => CsmePayload::Opaque,
    };

    Ok(CsmeEvent {
        data_type,
        entity,
        data,
        payload,
    })
}

/// Parses the CSME measurement log carried in an EV_NONHOST_INFO event.
pub fn parse_measurement_event(
    buf: &[u8],
) -> Result<FirmwareMeasurements, CsmeError> {
    let mut cur = Cursor::new(buf);
    read_signature(&mut cur, SIG_MEASUREMENT)?;

    let er_alg = match cur.read_u32::<LittleEndian>()? {
        0 => Some(HashAlg::Sha1),
        2 => Some(HashAlg::Sha256),
        4 => Some(HashAlg::Sha384),
        _ => None,
    };

    let mut events = Vec::new();
    while (cur.position() as usize) < buf.len() {
        events.push(parse_tagged_event(&mut cur)?);
    }
    Ok(FirmwareMeasurements { er_alg, events })
}

/// Parses the firmware info record carried in an EV_NONHOST_INFO event.
pub fn parse_info_event(buf: &[u8]) -> Result<FirmwareInfo, CsmeError> {
    let mut cur = Cursor::new(buf);
    read_signature(&mut cur, SIG_INFO)?;

    let version = cur.read_u32::<LittleEndian>()?;
    let vendor_id = cur.read_u16::<LittleEndian>()?;
    let device_id = cur.read_u16::<LittleEndian>()?;
    let flags = cur.read_u32::<LittleEndian>()?;

    Ok(FirmwareInfo {
        version,
        vendor_id,
        device_id,
        hardware_rot: flags & 0b000001 != 0,
        invalid_state: flags & 0b000010 != 0,
        untrusted_measurement: flags & 0b000100 != 0,
        invalid_measurement: flags & 0b001000 != 0,
        log_unavailable: flags & 0b010000 != 0,
        fdo_invalid_measurement: flags & 0b100000 != 0,
    })
}

/// Parses the AMT configuration record carried in an EV_NONHOST_CONFIG
/// event.
pub fn parse_config_event(buf: &[u8]) -> Result<AmtConfig, CsmeError> {
    let mut cur = Cursor::new(buf);
    read_signature(&mut cur, SIG_CONFIG)?;

    let data_len = cur.read_u32::<LittleEndian>()?;
    if data_len < 2 + 2 + 256 + 4 + 64 {
        return Err(CsmeError::ConfigTooShort(data_len));
    }

    let flags = cur.read_u16::<LittleEndian>()?;
    let mut suffix = [0u8; 256];
    cur.read_exact(&mut suffix)?;
    let end = suffix
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    let secure_pki_suffix =
        String::from_utf8_lossy(&suffix[..end]).into_owned();
    let certificate_hash_algorithm = cur.read_u32::<LittleEndian>()?;
    let mut certificate_hash = vec![0u8; 64];
    cur.read_exact(&mut certificate_hash)?;

    Ok(AmtConfig {
        amt_globally_enabled: flags & (1 << 0) != 0,
        mebx_power_set: flags & (1 << 1) != 0,
        amt_provisioned: flags & (1 << 2) != 0,
        amt_provisioning_mode: if flags & (1 << 3) != 0 {
            "enterprise".to_owned()
        } else {
            "none".to_owned()
        },
        zero_touch: flags & (1 << 4) != 0,
        kvm: flags & (1 << 8) != 0,
        serial_over_lan: flags & (1 << 9) != 0,
        usb_redirect: flags & (1 << 10) != 0,
        secure_pki_suffix,
        certificate_hash_algorithm,
        certificate_hash,
    })
}

/// Replays the extend register over the decoded measurement log. Event
/// data shorter than the digest is zero padded before hashing. On Comet
/// Lake the IDLM initialize manifest event seeds the register instead of
/// being extended; a second seed invalidates the replay. The final value
/// is byte swapped per 32-bit register word, matching how the CSME
/// reports it.
pub fn replay_er(
    alg: HashAlg,
    comet_lake: bool,
    events: &[CsmeEvent],
) -> Option<Vec<u8>> {
    let sz = alg.digest_len();
    let mut er: Option<Vec<u8>> = None;

    for event in events {
        if comet_lake
            && event.data_type == INITIALIZE_MANIFEST
            && event.entity == IDLM_MANIFEST
        {
            if er.is_some() {
                return None;
            }
            er = Some(event.data.clone());
            continue;
        }
        let mut input = Vec::with_capacity(sz * 2);
        input.extend_from_slice(&er.unwrap_or_else(|| vec![0u8; sz]));
        input.extend_from_slice(&event.data);
        if event.data.len() < sz {
            input.resize(sz + sz, 0);
        }
        er = Some(alg.hash(&input).ok()?);
    }

    let er = er?;
    if er.len() % 4 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(er.len());
    for word in er.chunks_exact(4) {
        out.extend_from_slice(&[word[3], word[2], word[1], word[0]]);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn tagged(data_type: u8, entity: u8, data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.write_u8(data_type).unwrap(); //#[allow_ci]
        b.write_u8(entity).unwrap(); //#[allow_ci]
        b.write_u16::<LittleEndian>(0).unwrap(); //#[allow_ci]
        b.write_u32::<LittleEndian>(data.len() as u32).unwrap(); //#[allow_ci]
        b.extend_from_slice(data);
        b
    }

    #[test]
    fn parse_measurement_log() {
        let mut version = Vec::new();
        for v in [16u16, 1, 27, 2089] {
            version.write_u16::<LittleEndian>(v).unwrap(); //#[allow_ci]
        }
        version.write_u32::<LittleEndian>(3).unwrap(); // TCB SVN //#[allow_ci]
        version.write_u32::<LittleEndian>(9).unwrap(); // ARB SVN //#[allow_ci]
        version.write_u32::<LittleEndian>(1).unwrap(); // VCN //#[allow_ci]
        version.write_u8(VERIFICATION_PASSED).unwrap(); //#[allow_ci]
        version.write_u8(INTEL_RBE_MANIFEST).unwrap(); //#[allow_ci]

        let mut buf = Vec::new();
        buf.write_all(SIG_MEASUREMENT).unwrap(); //#[allow_ci]
        buf.write_u32::<LittleEndian>(2).unwrap(); // sha256 //#[allow_ci]
        buf.extend_from_slice(&tagged(
            INITIALIZE_MANIFEST,
            INTEL_RBE_MANIFEST,
            &[0xAB; 32],
        ));
        buf.extend_from_slice(&tagged(
            MANIFEST_VERSION,
            INTEL_RBE_MANIFEST,
            &version,
        ));

        let log = parse_measurement_event(&buf).unwrap(); //#[allow_ci]
        assert_eq!(log.er_alg, Some(HashAlg::Sha256));
        assert_eq!(log.events.len(), 2);
        match &log.events[1].payload {
            CsmePayload::ManifestVersion(v) => {
                assert_eq!(v.version, [16, 1, 27, 2089]);
                assert_eq!(v.arb_svn, 9);
                assert_eq!(v.verification_status, VERIFICATION_PASSED);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn reject_bad_signature() {
        let buf = vec![0u8; 64];
        assert!(matches!(
            parse_measurement_event(&buf),
            Err(CsmeError::InvalidSignature)
        ));
        assert!(parse_info_event(&buf).is_err());
        assert!(parse_config_event(&buf).is_err());
    }

    #[test]
    fn reject_truncated_tagged_event() {
        let mut buf = Vec::new();
        buf.write_all(SIG_MEASUREMENT).unwrap(); //#[allow_ci]
        buf.write_u32::<LittleEndian>(2).unwrap(); //#[allow_ci]
        buf.write_u8(EXTEND_MANIFEST).unwrap(); //#[allow_ci]
        buf.write_u8(PMC_MANIFEST).unwrap(); //#[allow_ci]
        buf.write_u16::<LittleEndian>(0).unwrap(); //#[allow_ci]
        buf.write_u32::<LittleEndian>(0xFFFF).unwrap(); //#[allow_ci]
        assert!(matches!(
            parse_measurement_event(&buf),
            Err(CsmeError::TruncatedEvent(0xFFFF, 0))
        ));
    }

    #[test]
    fn parse_info_record() {
        let mut buf = Vec::new();
        buf.write_all(SIG_INFO).unwrap(); //#[allow_ci]
        buf.write_u32::<LittleEndian>(0x1001).unwrap(); //#[allow_ci]
        buf.write_u16::<LittleEndian>(0x8086).unwrap(); //#[allow_ci]
        buf.write_u16::<LittleEndian>(0x43A0).unwrap(); //#[allow_ci]
        buf.write_u32::<LittleEndian>(0b010001).unwrap(); //#[allow_ci]

        let info = parse_info_event(&buf).unwrap(); //#[allow_ci]
        assert_eq!(info.vendor_id, 0x8086);
        assert!(info.hardware_rot);
        assert!(info.log_unavailable);
        assert!(!info.invalid_state);
    }

    #[test]
    fn parse_config_record() {
        let mut suffix = [0u8; 256];
        suffix[..11].copy_from_slice(b"example.com");
        let mut buf = Vec::new();
        buf.write_all(SIG_CONFIG).unwrap(); //#[allow_ci]
        buf.write_u32::<LittleEndian>(2 + 2 + 256 + 4 + 64).unwrap(); //#[allow_ci]
        let flags: u16 = (1 << 0) | (1 << 2) | (1 << 3) | (1 << 8);
        buf.write_u16::<LittleEndian>(flags).unwrap(); //#[allow_ci]
        buf.write_all(&suffix).unwrap(); //#[allow_ci]
        buf.write_u32::<LittleEndian>(0x0c).unwrap(); //#[allow_ci]
        buf.write_all(&[0x5A; 64]).unwrap(); //#[allow_ci]

        let cfg = parse_config_event(&buf).unwrap(); //#[allow_ci]
        assert!(cfg.amt_globally_enabled);
        assert!(cfg.amt_provisioned);
        assert!(cfg.kvm);
        assert!(!cfg.serial_over_lan);
        assert_eq!(cfg.amt_provisioning_mode, "enterprise");
        assert_eq!(cfg.secure_pki_suffix, "example.com");
    }

    #[test]
    fn replay_extend_register() {
        let events = vec![
            CsmeEvent {
                data_type: INITIALIZE_MANIFEST,
                entity: PMC_MANIFEST,
                data: vec![0x01; 48],
                payload: CsmePayload::InitializeManifest,
            },
            CsmeEvent {
                data_type: EXTEND_MANIFEST,
                entity: PMC_MANIFEST,
                data: vec![0x02; 48],
                payload: CsmePayload::ExtendManifest,
            },
        ];
        let er = replay_er(HashAlg::Sha384, false, &events).unwrap(); //#[allow_ci]
        assert_eq!(er.len(), 48);

        // Manual fold with the register byte swap undone.
        let mut running = vec![0u8; 48];
        for e in &events {
            let mut input = running.clone();
            input.extend_from_slice(&e.data);
            running = HashAlg::Sha384.hash(&input).unwrap(); //#[allow_ci]
        }
        let mut swapped = Vec::new();
        for w in running.chunks_exact(4) {
            swapped.extend_from_slice(&[w[3], w[2], w[1], w[0]]);
        }
        assert_eq!(er, swapped);
    }

    #[test]
    fn comet_lake_idlm_seeds_register() {
        let seed = CsmeEvent {
            data_type: INITIALIZE_MANIFEST,
            entity: IDLM_MANIFEST,
            data: vec![0x0F; 32],
            payload: CsmePayload::InitializeManifest,
        };
        let extend = CsmeEvent {
            data_type: EXTEND_MANIFEST,
            entity: PMC_MANIFEST,
            data: vec![0x10; 32],
            payload: CsmePayload::ExtendManifest,
        };
        let er = replay_er(
            HashAlg::Sha256,
            true,
            &[seed.clone(), extend.clone()],
        )
        .unwrap(); //#[allow_ci]
        assert_eq!(er.len(), 32);

        // A second seed invalidates the replay.
        assert!(replay_er(
            HashAlg::Sha256,
            true,
            &[seed.clone(), seed, extend]
        )
        .is_none());
    }

    #[test]
    fn short_event_data_is_zero_padded() {
        let short = CsmeEvent {
            data_type: CONFIGURATION_DATA,
            entity: OPERATION_MODE_ID,
            data: vec![0x00],
            payload: CsmePayload::OperationMode(OperationMode::Normal),
        };
        let er = replay_er(HashAlg::Sha256, false, &[short]).unwrap(); //#[allow_ci]
        let mut input = vec![0u8; 32];
        input.resize(64, 0);
        input[32] = 0x00;
        let mut expect = Vec::new();
        for w in HashAlg::Sha256.hash(&input).unwrap().chunks_exact(4) { //#[allow_ci]
            expect.extend_from_slice(&[w[3], w[2], w[1], w[0]]);
        }
        assert_eq!(er, expect);
    }

    #[test]
    fn entity_names() {
        assert_eq!(
            measured_entity_name(EXTEND_MANIFEST, OEM_KEY_MANIFEST),
            "OEM Key Manifest"
        );
        assert_eq!(
            measured_entity_name(CONFIGURATION_DATA, OPERATION_MODE_ID),
            "CSME Operation Mode"
        );
        assert_eq!(
            measured_entity_name(CONFIGURATION_DATA, 99),
            "Unknown entity 99 for event type 3"
        );
    }
}
