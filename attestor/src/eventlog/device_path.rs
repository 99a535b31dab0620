// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Translates EFI Device Paths into their canonical text representation,
//! UEFI spec section 10.6.1.6 table 102. The text form is what baselines
//! key boot applications by, so the formatting here is load bearing.

use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use super::efi::{EfiError, EfiGuid};

const TYPE_HARDWARE: u8 = 0x01;
const TYPE_ACPI: u8 = 0x02;
const TYPE_MESSAGING: u8 = 0x03;
const TYPE_MEDIA: u8 = 0x04;
const TYPE_BBS: u8 = 0x05;
const TYPE_END: u8 = 0x7f;

const HW_PCI: u8 = 0x01;
const HW_MMIO: u8 = 0x03;

const ACPI_NORMAL: u8 = 0x01;
const ACPI_EXPANDED: u8 = 0x02;
const ACPI_ADR: u8 = 0x03;

const MSG_USB: u8 = 5;
const MSG_VENDOR: u8 = 10;
const MSG_MAC: u8 = 11;
const MSG_IPV4: u8 = 12;
const MSG_IPV6: u8 = 13;
const MSG_SATA: u8 = 18;
const MSG_NVM: u8 = 23;

const MEDIA_HARD_DRIVE: u8 = 0x01;
const MEDIA_FILE_PATH: u8 = 0x04;
const MEDIA_PIWG_FILE: u8 = 0x06;
const MEDIA_PIWG_VOLUME: u8 = 0x07;
const MEDIA_OFFSET: u8 = 0x08;

const BBS_101: u8 = 0x01;

const END_THIS: u8 = 0x01;
const END_ENTIRE: u8 = 0xff;

const SIG_TYPE_MBR: u8 = 0x01;
const SIG_TYPE_GUID: u8 = 0x02;

/// Translates a binary EFI Device Path into its canonical string form.
pub fn device_path(b: &[u8]) -> Result<String, EfiError> {
    let mut cur = Cursor::new(b);
    let mut offset: usize = 0;
    let mut output = String::new();

    while offset < b.len() {
        cur.seek(SeekFrom::Start(offset as u64))?;
        let typ = cur.read_u8()?;
        let sub_type = cur.read_u8()?;
        let length = cur.read_u16::<LittleEndian>()?;
        if length < 4 || offset + length as usize > b.len() {
            return Err(EfiError::MalformedDevicePath);
        }
        offset += length as usize;

        match typ {
            TYPE_HARDWARE => match sub_type {
                HW_PCI => {
                    let function = cur.read_u8()?;
                    let device = cur.read_u8()?;
                    output
                        .push_str(&format!("Pci(0x{device:x},0x{function:x})"));
                }
                HW_MMIO => {
                    let memory_type = cur.read_u32::<LittleEndian>()?;
                    let start = cur.read_u64::<LittleEndian>()?;
                    let end = cur.read_u64::<LittleEndian>()?;
                    output.push_str(&format!(
                        "MemoryMapped(0x{memory_type:x},0x{start:x},0x{end:x})"
                    ));
                }
                _ => dump_node(
                    &mut cur,
                    typ,
                    sub_type,
                    length,
                    "HardwarePath",
                    &mut output,
                )?,
            },
            TYPE_ACPI => match sub_type {
                ACPI_NORMAL => {
                    let hid = cur.read_u32::<LittleEndian>()?;
                    let uid = cur.read_u32::<LittleEndian>()?;
                    output.push_str(&acpi_node(hid, uid));
                }
                ACPI_EXPANDED => {
                    let hid = cur.read_u32::<LittleEndian>()?;
                    let uid = cur.read_u32::<LittleEndian>()?;
                    let cid = cur.read_u32::<LittleEndian>()?;
                    let mut data = vec![0u8; length as usize - 16];
                    cur.read_exact(&mut data)?;
                    output.push_str(&expanded_acpi_node(hid, uid, cid, &data));
                }
                ACPI_ADR => {
                    let mut adrs = Vec::new();
                    for _ in 0..(length as usize - 4) / 4 {
                        adrs.push(cur.read_u32::<LittleEndian>()?);
                    }
                    let body: Vec<String> =
                        adrs.iter().map(|a| format!("0x{a:x}")).collect();
                    output.push_str(&format!("AcpiAdr({})", body.join(",")));
                }
                _ => dump_node(
                    &mut cur,
                    typ,
                    sub_type,
                    length,
                    "AcpiPath",
                    &mut output,
                )?,
            },
            TYPE_MESSAGING => match sub_type {
                MSG_USB => {
                    let parent_port = cur.read_u8()?;
                    let interface = cur.read_u8()?;
                    output.push_str(&format!(
                        "USB(0x{parent_port:x},0x{interface:x})"
                    ));
                }
                MSG_VENDOR => {
                    let guid = EfiGuid::parse(&mut cur)?;
                    output.push_str(&format!("VenMsg({guid})"));
                }
                MSG_MAC => {
                    let mut mac = [0u8; 32];
                    cur.read_exact(&mut mac)?;
                    let if_type = cur.read_u8()?;
                    let hw_len =
                        if if_type <= 0x01 { 6 } else { mac.len() };
                    output.push_str("MAC(");
                    for byte in &mac[..hw_len] {
                        output.push_str(&format!("{byte:02x}"));
                    }
                    output.push_str(&format!(",0x{if_type:x})"));
                }
                MSG_IPV4 => output.push_str(&ipv4_node(&mut cur)?),
                MSG_IPV6 => output.push_str(&ipv6_node(&mut cur)?),
                MSG_SATA => {
                    let hba = cur.read_u16::<LittleEndian>()?;
                    let port_multiplier = cur.read_u16::<LittleEndian>()?;
                    let lun = cur.read_u16::<LittleEndian>()?;
                    output.push_str(&format!(
                        "Sata(0x{hba:x},0x{port_multiplier:x},0x{lun:x})"
                    ));
                }
                MSG_NVM => {
                    let namespace = cur.read_u32::<LittleEndian>()?;
                    let mut eui = [0u8; 8];
                    cur.read_exact(&mut eui)?;
                    let ids: Vec<String> =
                        eui.iter().map(|b| format!("{b:02x}")).collect();
                    output.push_str(&format!(
                        "NVMe(0x{namespace:x},{})",
                        ids.join("-")
                    ));
                }
                _ => dump_node(
                    &mut cur,
                    typ,
                    sub_type,
                    length,
                    "Msg",
                    &mut output,
                )?,
            },
            TYPE_MEDIA => match sub_type {
                MEDIA_HARD_DRIVE => output.push_str(&hard_drive_node(&mut cur)?),
                MEDIA_FILE_PATH => {
                    let mut wide =
                        Vec::with_capacity((length as usize - 4) / 2);
                    for _ in 0..(length as usize - 4) / 2 {
                        wide.push(cur.read_u16::<LittleEndian>()?);
                    }
                    let path = String::from_utf16_lossy(&wide);
                    output.push_str(path.trim_end_matches('\u{0}'));
                }
                MEDIA_PIWG_FILE => {
                    let guid = EfiGuid::parse(&mut cur)?;
                    output.push_str(&format!("FvFile({guid})"));
                }
                MEDIA_PIWG_VOLUME => {
                    let guid = EfiGuid::parse(&mut cur)?;
                    output.push_str(&format!("Fv({guid})"));
                }
                MEDIA_OFFSET => {
                    let _reserved = cur.read_u32::<LittleEndian>()?;
                    let start = cur.read_u64::<LittleEndian>()?;
                    let end = cur.read_u64::<LittleEndian>()?;
                    output.push_str(&format!(
                        "Offset(0x{start:x}, 0x{end:x})"
                    ));
                }
                _ => dump_node(
                    &mut cur,
                    typ,
                    sub_type,
                    length,
                    "MediaPath",
                    &mut output,
                )?,
            },
            TYPE_BBS => match sub_type {
                BBS_101 => {
                    let device_type = cur.read_u16::<LittleEndian>()?;
                    let status = cur.read_u16::<LittleEndian>()?;
                    let mut description = vec![0u8; length as usize - 8];
                    cur.read_exact(&mut description)?;
                    output.push_str(&bbs_node(
                        device_type,
                        status,
                        &description,
                    ));
                }
                _ => dump_node(
                    &mut cur,
                    typ,
                    sub_type,
                    length,
                    "BbsPath",
                    &mut output,
                )?,
            },
            TYPE_END => match sub_type {
                END_THIS => output.push(','),
                END_ENTIRE => {
                    if output.ends_with('/') {
                        output.truncate(output.len() - 1);
                    }
                    output.push(',');
                    continue;
                }
                _ => output
                    .push_str(&format!("Unknown end subtype {sub_type}")),
            },
            _ => dump_node(&mut cur, typ, sub_type, length, "", &mut output)?,
        }
        output.push('/');
    }

    if output.ends_with('/') {
        output.truncate(output.len() - 1);
    }
    Ok(output)
}

fn dump_node(
    cur: &mut Cursor<&[u8]>,
    typ: u8,
    sub_type: u8,
    length: u16,
    prefix: &str,
    output: &mut String,
) -> Result<(), EfiError> {
    let mut data = vec![0u8; length as usize - 4];
    cur.read_exact(&mut data)?;
    if prefix.is_empty() {
        output.push_str(&format!(
            "Path({typ},{sub_type},{})",
            hex::encode(&data)
        ));
    } else {
        output.push_str(&format!(
            "{prefix}({sub_type},{})",
            hex::encode(&data)
        ));
    }
    Ok(())
}

fn acpi_node(hid: u32, uid: u32) -> String {
    if (hid & 0xffff) != 0x41d0 {
        return format!("Acpi(0x{hid:08x},0x{uid:x})");
    }
    match hid >> 16 {
        0x0a03 => format!("PciRoot(0x{uid:x})"),
        0x0a08 => format!("PcieRoot(0x{uid:x})"),
        0x0604 => format!("Floppy(0x{uid:x})"),
        0x0301 => format!("Keyboard(0x{uid:x})"),
        0x0501 => format!("Serial(0x{uid:x})"),
        0x0401 => format!("ParallelPort(0x{uid:x})"),
        other => format!("Acpi(PNP{other:04x},0x{uid:x})"),
    }
}

fn eisa_id(id: u32) -> String {
    format!(
        "{}{}{}{:04x}",
        (((id >> 10) & 0x1f) as u8 + 0x40) as char,
        (((id >> 5) & 0x1f) as u8 + 0x40) as char,
        ((id & 0x1f) as u8 + 0x40) as char,
        id >> 16
    )
}

fn expanded_acpi_node(hid: u32, uid: u32, cid: u32, data: &[u8]) -> String {
    // Three NUL-terminated strings follow the fixed part.
    let mut parts = data.splitn(3, |&b| b == 0);
    let hid_str =
        String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
    let uid_str =
        String::from_utf8_lossy(parts.next().unwrap_or_default()).into_owned();
    let cid_str = String::from_utf8_lossy(
        parts.next().unwrap_or_default().split(|&b| b == 0).next().unwrap_or_default(),
    )
    .into_owned();

    if hid >> 16 == 0x0a08 || cid >> 16 == 0x0a08 {
        if uid == 0 {
            return format!("PcieRoot({uid_str})");
        }
        return format!("PcieRoot(0x{uid:x})");
    }

    if hid_str.is_empty() && cid_str.is_empty() && uid_str.is_empty() {
        if cid == 0 {
            return format!("AcpiExp({},0,{uid_str})", eisa_id(hid));
        }
        return format!("AcpiExp({},{},{uid_str})", eisa_id(hid), eisa_id(cid));
    }

    format!(
        "AcpiExp({}, {}, 0x{uid:x}, {hid_str}, {cid_str}, {uid_str})",
        eisa_id(hid),
        eisa_id(cid)
    )
}

fn ipv4_node(cur: &mut Cursor<&[u8]>) -> Result<String, EfiError> {
    let mut local = [0u8; 4];
    cur.read_exact(&mut local)?;
    let mut remote = [0u8; 4];
    cur.read_exact(&mut remote)?;
    let local_port = cur.read_u16::<LittleEndian>()?;
    let remote_port = cur.read_u16::<LittleEndian>()?;
    let protocol = cur.read_u16::<LittleEndian>()?;
    let static_ip = cur.read_u8()?;
    let mut gateway = [0u8; 4];
    cur.read_exact(&mut gateway)?;
    let mut subnet = [0u8; 4];
    cur.read_exact(&mut subnet)?;

    let mut out = String::from("IPv4(");
    out.push_str(&format!(
        "{}.{}.{}.{}:{remote_port},",
        remote[0], remote[1], remote[2], remote[3]
    ));
    match protocol {
        6 => out.push_str("TCP,"),
        17 => out.push_str("UDP,"),
        other => out.push_str(&format!("0x{other:x},")),
    }
    if static_ip == 0 {
        out.push_str("DHCP,");
    } else {
        out.push_str("Static,");
    }
    out.push_str(&format!(
        "{}.{}.{}.{}:{local_port},",
        local[0], local[1], local[2], local[3]
    ));
    out.push_str(&format!(
        "{}.{}.{}.{},",
        gateway[0], gateway[1], gateway[2], gateway[3]
    ));
    out.push_str(&format!(
        "{}.{}.{}.{})",
        subnet[0], subnet[1], subnet[2], subnet[3]
    ));
    Ok(out)
}

fn ipv6_groups(addr: &[u8; 16]) -> String {
    let groups: Vec<String> = addr
        .chunks_exact(2)
        .map(|pair| format!("{:04x}", u16::from_be_bytes([pair[0], pair[1]])))
        .collect();
    groups.join(":")
}

fn ipv6_node(cur: &mut Cursor<&[u8]>) -> Result<String, EfiError> {
    let mut local = [0u8; 16];
    cur.read_exact(&mut local)?;
    let mut remote = [0u8; 16];
    cur.read_exact(&mut remote)?;
    let local_port = cur.read_u16::<LittleEndian>()?;
    let remote_port = cur.read_u16::<LittleEndian>()?;
    let protocol = cur.read_u16::<LittleEndian>()?;
    let address_origin = cur.read_u8()?;
    let prefix_length = cur.read_u8()?;
    let mut gateway = [0u8; 16];
    cur.read_exact(&mut gateway)?;

    let mut out = String::from("IPv6(");
    out.push_str(&format!("{}:{remote_port},", ipv6_groups(&remote)));
    match protocol {
        6 => out.push_str("TCP,"),
        17 => out.push_str("UDP,"),
        other => out.push_str(&format!("0x{other:x},")),
    }
    match address_origin {
        0 => out.push_str("Static,"),
        1 => out.push_str("StatelessAutoConfigure,"),
        _ => out.push_str("StatefulAutoConfigure,"),
    }
    out.push_str(&format!("{}:{local_port},", ipv6_groups(&local)));
    out.push_str(&format!("0x{prefix_length:x},"));
    out.push_str(&format!("{})", ipv6_groups(&gateway)));
    Ok(out)
}

fn hard_drive_node(cur: &mut Cursor<&[u8]>) -> Result<String, EfiError> {
    let partition = cur.read_u32::<LittleEndian>()?;
    let partition_start = cur.read_u64::<LittleEndian>()?;
    let partition_size = cur.read_u64::<LittleEndian>()?;
    let mut signature = [0u8; 16];
    cur.read_exact(&mut signature)?;
    let _format = cur.read_u8()?;
    let signature_type = cur.read_u8()?;

    Ok(match signature_type {
        SIG_TYPE_MBR => {
            let sig = u32::from_le_bytes([
                signature[0],
                signature[1],
                signature[2],
                signature[3],
            ]);
            format!(
                "HD({partition},MBR,0x{sig:08x},0x{partition_start:x},0x{partition_size:x})"
            )
        }
        SIG_TYPE_GUID => {
            let mut sig_cur = Cursor::new(signature.as_slice());
            let guid = EfiGuid::parse(&mut sig_cur)?;
            format!(
                "HD({partition},GPT,{guid},0x{partition_start:x},0x{partition_size:x})"
            )
        }
        other => format!(
            "HD({partition},{other},0,0x{partition_start:x},0x{partition_size:x})"
        ),
    })
}

fn bbs_node(device_type: u16, status: u16, description: &[u8]) -> String {
    let description = String::from_utf8_lossy(description);
    let description = description.trim_end_matches('\u{0}');
    let kind = match device_type {
        0x01 => "Floppy".to_string(),
        0x02 => "HD".to_string(),
        0x03 => "CDROM".to_string(),
        0x04 => "PCMCIA".to_string(),
        0x05 => "USB".to_string(),
        0x06 => "Network".to_string(),
        other => format!("0x{other:x}"),
    };
    format!("BBS({kind},{description},0x{status:x})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn node(typ: u8, sub_type: u8, body: &[u8]) -> Vec<u8> {
        let mut b = vec![typ, sub_type];
        b.extend_from_slice(&(4 + body.len() as u16).to_le_bytes());
        b.extend_from_slice(body);
        b
    }

    #[test]
    fn pci_root_and_pci() {
        let mut path = Vec::new();
        // ACPI PciRoot(0x0)
        let mut acpi = Vec::new();
        acpi.extend_from_slice(&0x0a0341d0u32.to_le_bytes());
        acpi.extend_from_slice(&0u32.to_le_bytes());
        path.extend_from_slice(&node(TYPE_ACPI, ACPI_NORMAL, &acpi));
        // Pci(0x2,0x1): function then device on the wire
        path.extend_from_slice(&node(TYPE_HARDWARE, HW_PCI, &[0x1, 0x2]));
        path.extend_from_slice(&node(TYPE_END, END_ENTIRE, &[]));

        assert_eq!(
            device_path(&path).unwrap(), //#[allow_ci]
            "PciRoot(0x0)/Pci(0x2,0x1),"
        );
    }

    #[test]
    fn file_path_node() {
        let mut body = Vec::new();
        for c in "\\EFI\\BOOT\\BOOTX64.EFI\u{0}".encode_utf16() {
            body.write_u16::<LittleEndian>(c).unwrap(); //#[allow_ci]
        }
        let path = node(TYPE_MEDIA, MEDIA_FILE_PATH, &body);
        assert_eq!(
            device_path(&path).unwrap(), //#[allow_ci]
            "\\EFI\\BOOT\\BOOTX64.EFI"
        );
    }

    #[test]
    fn hard_drive_gpt_node() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&0x800u64.to_le_bytes());
        body.extend_from_slice(&0x32000u64.to_le_bytes());
        // Partition GUID in on-disk layout.
        body.extend_from_slice(&0x11223344u32.to_le_bytes());
        body.extend_from_slice(&0x5566u16.to_le_bytes());
        body.extend_from_slice(&0x7788u16.to_le_bytes());
        body.extend_from_slice(&[0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00]);
        body.push(0x02); // partition format GPT
        body.push(SIG_TYPE_GUID);
        let path = node(TYPE_MEDIA, MEDIA_HARD_DRIVE, &body);
        assert_eq!(
            device_path(&path).unwrap(), //#[allow_ci]
            "HD(1,GPT,11223344-5566-7788-99aa-bbccddeeff00,0x800,0x32000)"
        );
    }

    #[test]
    fn reject_malformed_length() {
        // Declared node length runs past the buffer.
        let path = vec![TYPE_MEDIA, MEDIA_FILE_PATH, 0xFF, 0x00, 0x41];
        assert!(device_path(&path).is_err());
    }

    #[test]
    fn reject_zero_length_node() {
        let path = vec![TYPE_MEDIA, MEDIA_FILE_PATH, 0x00, 0x00];
        assert!(device_path(&path).is_err());
    }
}
