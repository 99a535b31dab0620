// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Second decoding pass: turns replay-validated generic events into typed
//! events with structured payloads. A payload that fails to decode keeps its
//! generic event and records the failure instead of aborting the pass, so a
//! single malformed event can never block evaluation of the rest.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use super::device_path::device_path;
use super::efi::{
    self, EfiGuid, EfiPartition, EfiPartitionTableHeader, UefiVariableData,
};
use super::windows::{self, MicrosoftEvent};
use super::{Event, EventType};

// Tagged event IDs from the conventional BIOS profile.
const TAG_OPTION_ROM_CONFIGURATION: u32 = 0x07;

/// An event whose payload is a string in either UCS-2 or raw byte form.
#[derive(Debug, Clone)]
pub struct StringEvent {
    pub event: Event,
    pub message: String,
    pub err: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventTagEvent {
    pub event: Event,
    pub event_id: u32,
    pub event_data: Vec<u8>,
    pub err: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OptionRomConfigEvent {
    pub event: Event,
    pub pfa: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MicrosoftBootEvent {
    pub event: Event,
    pub events: Vec<MicrosoftEvent>,
}

/// Common decoded form of EV_EFI_VARIABLE_* events.
#[derive(Debug, Clone)]
pub struct UefiVariableEvent {
    pub event: Event,
    pub guid: EfiGuid,
    pub name: String,
    pub data: Vec<u8>,
    pub err: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UefiBootVariableEvent {
    pub variable: UefiVariableEvent,
    pub description: String,
    pub device_path: String,
    pub device_path_raw: Vec<u8>,
    pub optional_data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UefiImageLoadEvent {
    pub event: Event,
    pub location_in_memory: u64,
    pub length_in_memory: u64,
    pub link_time_address: u64,
    pub device_path: String,
    pub device_path_raw: Vec<u8>,
    pub err: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UefiGptEvent {
    pub event: Event,
    pub header: Option<EfiPartitionTableHeader>,
    pub partitions: Vec<EfiPartition>,
    pub err: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UefiPlatformFirmwareBlobEvent {
    pub event: Event,
    pub blob_base: u64,
    pub blob_length: u64,
    pub err: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UefiHandoffTablesEvent {
    pub event: Event,
    pub tables: Vec<efi::EfiConfigurationTable>,
    pub err: Option<String>,
}

/// The closed set of event forms the fact extraction understands. Events of
/// types outside this set are dropped here; replay has already accounted for
/// their digests.
#[derive(Debug, Clone)]
pub enum TypedEvent {
    PrebootCert(Event),
    Post(StringEvent),
    NoAction(Event),
    Separator(Event),
    Action(StringEvent),
    EventTag(EventTagEvent),
    OptionRomConfig(OptionRomConfigEvent),
    MicrosoftBoot(MicrosoftBootEvent),
    CrtmContent(StringEvent),
    Crtm(StringEvent),
    Microcode(StringEvent),
    PlatformConfigFlags(Event),
    TableOfDevices(Event),
    CompactHash(Event),
    Ipl(StringEvent),
    IplPartition(Event),
    NonhostCode(Event),
    NonhostConfig(Event),
    NonhostInfo(Event),
    OmitBootDeviceEvents(StringEvent),
    VariableDriverConfig(UefiVariableEvent),
    BootVariable(UefiBootVariableEvent),
    BootServicesApplication(UefiImageLoadEvent),
    BootServicesDriver(UefiImageLoadEvent),
    RuntimeServicesDriver(UefiImageLoadEvent),
    UefiAction(StringEvent),
    Gpt(UefiGptEvent),
    PlatformFirmwareBlob(UefiPlatformFirmwareBlobEvent),
    HandoffTables(UefiHandoffTablesEvent),
    VariableAuthority(UefiVariableEvent),
}

impl TypedEvent {
    /// The generic event this typed event was decoded from.
    pub fn base(&self) -> &Event {
        match self {
            TypedEvent::PrebootCert(e)
            | TypedEvent::NoAction(e)
            | TypedEvent::Separator(e)
            | TypedEvent::PlatformConfigFlags(e)
            | TypedEvent::TableOfDevices(e)
            | TypedEvent::CompactHash(e)
            | TypedEvent::IplPartition(e)
            | TypedEvent::NonhostCode(e)
            | TypedEvent::NonhostConfig(e)
            | TypedEvent::NonhostInfo(e) => e,
            TypedEvent::Post(s)
            | TypedEvent::Action(s)
            | TypedEvent::CrtmContent(s)
            | TypedEvent::Crtm(s)
            | TypedEvent::Microcode(s)
            | TypedEvent::Ipl(s)
            | TypedEvent::OmitBootDeviceEvents(s)
            | TypedEvent::UefiAction(s) => &s.event,
            TypedEvent::EventTag(e) => &e.event,
            TypedEvent::OptionRomConfig(e) => &e.event,
            TypedEvent::MicrosoftBoot(e) => &e.event,
            TypedEvent::VariableDriverConfig(v)
            | TypedEvent::VariableAuthority(v) => &v.event,
            TypedEvent::BootVariable(v) => &v.variable.event,
            TypedEvent::BootServicesApplication(i)
            | TypedEvent::BootServicesDriver(i)
            | TypedEvent::RuntimeServicesDriver(i) => &i.event,
            TypedEvent::Gpt(e) => &e.event,
            TypedEvent::PlatformFirmwareBlob(e) => &e.event,
            TypedEvent::HandoffTables(e) => &e.event,
        }
    }
}

fn string_event(event: Event) -> StringEvent {
    match efi::parse_string_data(&event.data) {
        Ok(message) => StringEvent {
            event,
            message,
            err: None,
        },
        Err(err) => StringEvent {
            event,
            message: String::new(),
            err: Some(err.to_string()),
        },
    }
}

/// Decodes the payloads of replay-validated events.
pub fn parse_events(events: &[Event]) -> Vec<TypedEvent> {
    let mut parsed = Vec::with_capacity(events.len());
    for event in events {
        let event = event.clone();
        let typed = match event.typ {
            EventType::PrebootCert => TypedEvent::PrebootCert(event),
            EventType::PostCode => TypedEvent::Post(string_event(event)),
            EventType::NoAction => TypedEvent::NoAction(event),
            EventType::Separator => TypedEvent::Separator(event),
            EventType::Action => TypedEvent::Action(string_event(event)),
            EventType::EventTag => parse_event_tag(event),
            EventType::ScrtmContents => {
                TypedEvent::CrtmContent(string_event(event))
            }
            EventType::ScrtmVersion => TypedEvent::Crtm(string_event(event)),
            EventType::CpuMicrocode => {
                TypedEvent::Microcode(string_event(event))
            }
            EventType::PlatformConfigFlags => {
                TypedEvent::PlatformConfigFlags(event)
            }
            EventType::TableOfDevices => TypedEvent::TableOfDevices(event),
            EventType::CompactHash => TypedEvent::CompactHash(event),
            EventType::Ipl => TypedEvent::Ipl(string_event(event)),
            EventType::IplPartitionData => TypedEvent::IplPartition(event),
            EventType::NonhostCode => TypedEvent::NonhostCode(event),
            EventType::NonhostConfig => TypedEvent::NonhostConfig(event),
            EventType::NonhostInfo => TypedEvent::NonhostInfo(event),
            EventType::OmitBootDeviceEvents => {
                TypedEvent::OmitBootDeviceEvents(string_event(event))
            }
            EventType::EfiVariableDriverConfig => {
                TypedEvent::VariableDriverConfig(parse_variable_event(event))
            }
            EventType::EfiVariableBoot => {
                TypedEvent::BootVariable(parse_boot_variable_event(event))
            }
            EventType::EfiBootServicesApplication => {
                TypedEvent::BootServicesApplication(parse_image_load(event))
            }
            EventType::EfiBootServicesDriver => {
                TypedEvent::BootServicesDriver(parse_image_load(event))
            }
            EventType::EfiRuntimeServicesDriver => {
                TypedEvent::RuntimeServicesDriver(parse_image_load(event))
            }
            EventType::EfiAction => {
                TypedEvent::UefiAction(string_event(event))
            }
            EventType::EfiGptEvent => TypedEvent::Gpt(parse_gpt(event)),
            EventType::EfiPlatformFirmwareBlob => {
                TypedEvent::PlatformFirmwareBlob(parse_firmware_blob(event))
            }
            EventType::EfiHandoffTables => {
                TypedEvent::HandoffTables(parse_handoff_tables(event))
            }
            EventType::EfiVariableAuthority => {
                TypedEvent::VariableAuthority(parse_variable_event(event))
            }
            // No structured payload is defined for these.
            EventType::EfiEventBase | EventType::EfiHcrtmEvent => continue,
        };
        parsed.push(typed);
    }
    parsed
}

fn parse_event_tag(event: Event) -> TypedEvent {
    let mut cur = Cursor::new(event.data.as_slice());
    let (event_id, size) = match (
        cur.read_u32::<LittleEndian>(),
        cur.read_u32::<LittleEndian>(),
    ) {
        (Ok(id), Ok(size)) => (id, size),
        (Err(err), _) | (_, Err(err)) => {
            return TypedEvent::EventTag(EventTagEvent {
                event,
                event_id: 0,
                event_data: Vec::new(),
                err: Some(err.to_string()),
            })
        }
    };
    let event_data = event.data.get(8..).unwrap_or_default().to_vec();
    if size as usize > event_data.len() {
        return TypedEvent::EventTag(EventTagEvent {
            event,
            event_id,
            event_data,
            err: Some("tagged event size exceeds payload".into()),
        });
    }

    if event_id == TAG_OPTION_ROM_CONFIGURATION {
        let mut cur = Cursor::new(event_data.as_slice());
        let rom = cur
            .read_u16::<LittleEndian>()
            .and_then(|_reserved| cur.read_u16::<LittleEndian>());
        match rom {
            Ok(pfa) => {
                let mut data = Vec::new();
                // Remainder is the vendor option ROM structure.
                let _ = cur.read_to_end(&mut data);
                TypedEvent::OptionRomConfig(OptionRomConfigEvent {
                    event,
                    pfa,
                    data,
                })
            }
            Err(err) => TypedEvent::EventTag(EventTagEvent {
                event,
                event_id,
                event_data,
                err: Some(err.to_string()),
            }),
        }
    } else {
        // Windows measures its Boot Configuration Log as tagged events.
        match windows::parse_microsoft_event(&event.data) {
            Ok(events) => {
                TypedEvent::MicrosoftBoot(MicrosoftBootEvent { event, events })
            }
            Err(err) => TypedEvent::EventTag(EventTagEvent {
                event,
                event_id,
                event_data,
                err: Some(err.to_string()),
            }),
        }
    }
}

fn parse_variable_event(event: Event) -> UefiVariableEvent {
    let mut cur = Cursor::new(event.data.as_slice());
    match UefiVariableData::parse(&mut cur) {
        Ok(var) => UefiVariableEvent {
            event,
            guid: var.guid,
            name: var.name(),
            data: var.data,
            err: None,
        },
        Err(err) => UefiVariableEvent {
            event,
            guid: EfiGuid::default(),
            name: String::new(),
            data: Vec::new(),
            err: Some(err.to_string()),
        },
    }
}

fn is_boot_option(name: &str) -> bool {
    name.len() == 8
        && name.starts_with("Boot")
        && name[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase())
}

fn parse_boot_variable_event(event: Event) -> UefiBootVariableEvent {
    let variable = parse_variable_event(event);
    let mut parsed = UefiBootVariableEvent {
        variable,
        description: String::new(),
        device_path: String::new(),
        device_path_raw: Vec::new(),
        optional_data: Vec::new(),
    };
    // Only "Boot####" variables carry an EFI_LOAD_OPTION payload; BootOrder
    // and friends stay undecoded.
    if parsed.variable.err.is_some() || !is_boot_option(&parsed.variable.name)
    {
        return parsed;
    }
    if let Err(err) = parse_load_option(&mut parsed) {
        parsed.variable.err = Some(err.to_string());
    }
    parsed
}

fn parse_load_option(
    parsed: &mut UefiBootVariableEvent,
) -> Result<(), efi::EfiError> {
    let data = parsed.variable.data.as_slice();
    let mut cur = Cursor::new(data);
    let _attributes = cur.read_u32::<LittleEndian>()?;
    let dp_length = cur.read_u16::<LittleEndian>()?;

    // The device path starts after the NUL terminator of the UCS-2
    // description.
    let mut description = Vec::new();
    let mut dp_offset = 6usize;
    while dp_offset < data.len() {
        let c = cur.read_u16::<LittleEndian>()?;
        dp_offset += 2;
        if c == 0 {
            break;
        }
        description.push(c);
    }
    parsed.description = String::from_utf16_lossy(&description);

    if dp_offset + dp_length as usize > data.len() {
        return Err(efi::EfiError::MalformedBootVariable);
    }
    let mut raw = vec![0u8; dp_length as usize];
    cur.read_exact(&mut raw)?;
    parsed.device_path = device_path(&raw)?;
    parsed.device_path_raw = raw;

    let optional_len = data.len() - dp_offset - dp_length as usize;
    if optional_len > 0 {
        let mut optional = vec![0u8; optional_len];
        cur.read_exact(&mut optional)?;
        parsed.optional_data = optional;
    }
    Ok(())
}

fn parse_image_load(event: Event) -> UefiImageLoadEvent {
    let mut parsed = UefiImageLoadEvent {
        event,
        location_in_memory: 0,
        length_in_memory: 0,
        link_time_address: 0,
        device_path: String::new(),
        device_path_raw: Vec::new(),
        err: None,
    };
    if let Err(err) = parse_image_load_data(&mut parsed) {
        parsed.err = Some(err.to_string());
    }
    parsed
}

fn parse_image_load_data(
    parsed: &mut UefiImageLoadEvent,
) -> Result<(), efi::EfiError> {
    let data = parsed.event.data.clone();
    let mut cur = Cursor::new(data.as_slice());
    parsed.location_in_memory = cur.read_u64::<LittleEndian>()?;
    parsed.length_in_memory = cur.read_u64::<LittleEndian>()?;
    parsed.link_time_address = cur.read_u64::<LittleEndian>()?;
    let dp_length = cur.read_u64::<LittleEndian>()?;
    let remaining = data.len().saturating_sub(cur.position() as usize);
    if dp_length as usize > remaining {
        return Err(efi::EfiError::MalformedDevicePath);
    }
    let mut raw = vec![0u8; dp_length as usize];
    cur.read_exact(&mut raw)?;
    parsed.device_path = device_path(&raw)?;
    parsed.device_path_raw = raw;
    Ok(())
}

fn parse_gpt(event: Event) -> UefiGptEvent {
    let mut parsed = UefiGptEvent {
        event,
        header: None,
        partitions: Vec::new(),
        err: None,
    };
    if let Err(err) = parse_gpt_data(&mut parsed) {
        parsed.err = Some(err.to_string());
    }
    parsed
}

fn parse_gpt_data(parsed: &mut UefiGptEvent) -> Result<(), efi::EfiError> {
    let data = parsed.event.data.clone();
    let mut cur = Cursor::new(data.as_slice());
    let header = EfiPartitionTableHeader::parse(&mut cur)?;
    let num_partitions = cur.read_u64::<LittleEndian>()?;
    let remaining = data.len().saturating_sub(cur.position() as usize);
    let declared =
        num_partitions.saturating_mul(header.size_of_partition_entry as u64);
    if declared > remaining as u64 {
        return Err(efi::EfiError::MalformedPartitionTable(
            declared, remaining,
        ));
    }
    // Header (92) + partition count (8) precede the entry array.
    for i in 0..num_partitions {
        cur.seek(SeekFrom::Start(
            100 + i * header.size_of_partition_entry as u64,
        ))?;
        parsed.partitions.push(EfiPartition::parse(&mut cur)?);
    }
    parsed.header = Some(header);
    Ok(())
}

fn parse_firmware_blob(event: Event) -> UefiPlatformFirmwareBlobEvent {
    if event.data.len() != 16 {
        let err = format!(
            "unexpected length for a platform firmware blob event: {}",
            event.data.len()
        );
        return UefiPlatformFirmwareBlobEvent {
            event,
            blob_base: 0,
            blob_length: 0,
            err: Some(err),
        };
    }
    let blob_base = u64::from_le_bytes(
        event.data[..8].try_into().unwrap_or_default(),
    );
    let blob_length = u64::from_le_bytes(
        event.data[8..16].try_into().unwrap_or_default(),
    );
    UefiPlatformFirmwareBlobEvent {
        event,
        blob_base,
        blob_length,
        err: None,
    }
}

fn parse_handoff_tables(event: Event) -> UefiHandoffTablesEvent {
    let mut parsed = UefiHandoffTablesEvent {
        event,
        tables: Vec::new(),
        err: None,
    };
    if let Err(err) = parse_handoff_tables_data(&mut parsed) {
        parsed.err = Some(err.to_string());
    }
    parsed
}

fn parse_handoff_tables_data(
    parsed: &mut UefiHandoffTablesEvent,
) -> Result<(), efi::EfiError> {
    let data = parsed.event.data.clone();
    let mut cur = Cursor::new(data.as_slice());
    let num_tables = cur.read_u64::<LittleEndian>()?;
    let remaining = data.len().saturating_sub(cur.position() as usize);
    if num_tables.saturating_mul(24) > remaining as u64 {
        return Err(efi::EfiError::MalformedPartitionTable(
            num_tables.saturating_mul(24),
            remaining,
        ));
    }
    for _ in 0..num_tables {
        let vendor_guid = EfiGuid::parse(&mut cur)?;
        let vendor_table = cur.read_u64::<LittleEndian>()?;
        parsed.tables.push(efi::EfiConfigurationTable {
            vendor_guid,
            vendor_table,
        });
    }
    Ok(())
}
