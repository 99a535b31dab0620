// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Extraction of boot facts from typed event streams.
//!
//! [`Boot`] folds a replay-validated event stream into the facts the rule
//! engine compares against baselines. Extraction is ordered and gated on the
//! per-PCR separator events: facts measured before the separator belong to
//! firmware, facts measured after belong to the boot loader and OS. Events
//! whose payload disagrees with their recorded digest abort extraction with
//! [`BootError::Payload`].

use std::collections::HashMap;

use openssl::x509::X509;
use thiserror::Error;

use crate::digest::{DigestError, DigestSet};
use crate::eventlog::csme::{
    self, AmtConfig, CsmePayload, FirmwareInfo, ManifestVersion,
    OperationMode, SecurityParameters,
};
use crate::eventlog::efi::{
    self, EfiPartition, EfiPartitionTableHeader, EFI_GLOBAL_VARIABLE,
    EFI_IMAGE_SECURITY_DATABASE,
};
use crate::eventlog::ima::ImaEvent;
use crate::eventlog::typed::{
    StringEvent, TypedEvent, UefiVariableEvent,
};
use crate::eventlog::{Event, HashAlg};

const BOOT_GUARD_SCRTM: &str = "Boot Guard Measured S-CRTM\u{0}";
const LENOVO_CONFIG_GUID: efi::EfiGuid = efi::EfiGuid::new(
    0xa2c1808f,
    0x0d4f,
    0x4cc9,
    [0xa6, 0x19, 0xd1, 0xe6, 0x41, 0xd3, 0x9d, 0x49],
);
const UEFI_SETUP_GUID: efi::EfiGuid = efi::EfiGuid::new(
    0xec87d643,
    0xeba4,
    0x4bb5,
    [0xa1, 0xe5, 0x3f, 0x3e, 0x36, 0xb2, 0x0d, 0xa9],
);

#[derive(Error, Debug)]
pub enum BootError {
    #[error("event payload manipulated")]
    Payload,
    #[error(transparent)]
    Digest(#[from] DigestError),
}

/// Progress of the firmware-to-OS handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitBootServices {
    #[default]
    Pre,
    Running,
    Done,
}

/// Separator payloads recorded per PCR, one per digest bank.
#[derive(Debug, Clone, Default)]
pub struct Separator {
    pub sha1: Vec<u8>,
    pub sha256: Vec<u8>,
}

/// Boot facts accumulated from one attestation's event logs.
#[derive(Debug, Clone, Default)]
pub struct Boot {
    pub is_empty: bool,

    pub boot_guard_ibb: DigestSet,

    pub setup: DigestSet,
    pub boot_variables: HashMap<String, DigestSet>,
    pub embedded_firmware: HashMap<String, DigestSet>,
    pub is_lenovo: bool,
    pub is_dell: bool,

    // Intel CSME
    pub csme_info: Option<FirmwareInfo>,
    pub amt_config: Option<AmtConfig>,
    pub csme_component_versions: HashMap<u8, ManifestVersion>,
    pub csme_component_hash: HashMap<u8, Vec<u8>>,
    pub csme_security_parameters: Option<SecurityParameters>,
    pub csme_operation_mode: Option<OperationMode>,

    pub separators: HashMap<u32, Separator>,
    pub exit_boot_services: ExitBootServices,

    pub boot_applications: HashMap<String, DigestSet>,
    pub gpt: DigestSet,
    pub partition_table_header: Option<EfiPartitionTableHeader>,
    pub partitions: Vec<EfiPartition>,

    // UEFI Secure Boot
    pub secure_boot: Option<u8>,
    pub audit_mode: Option<u8>,
    pub deployed_mode: Option<u8>,
    pub setup_mode: Option<u8>,
    pub pk: DigestSet,
    pub pk_parsed: Option<X509>,
    pub kek: DigestSet,
    pub kek_parsed: Vec<X509>,
    pub db: DigestSet,
    pub dbx_contents: HashMap<String, bool>,

    // shim
    pub mok_list: DigestSet,
    pub mok_list_x: DigestSet,

    // GRUB
    pub linux_file: String,
    pub linux_digest: DigestSet,
    pub linux_command: Option<Vec<String>>,
    pub initrd_file: String,
    pub initrd_digest: DigestSet,

    // IMA
    pub files: HashMap<String, DigestSet>,
    pub boot_aggregate: DigestSet,
}

/// The recorded digest of an event as a [`DigestSet`], empty when the bank
/// is unknown.
fn event_digest(event: &Event) -> DigestSet {
    DigestSet::new(&event.digest).unwrap_or_default()
}

/// True when the recorded digest matches the hash of the payload. Events
/// without a digest pass.
fn digest_matches(event: &Event, data: &[u8]) -> bool {
    if event.digest.is_empty() {
        return true;
    }
    match event.alg.hash(data) {
        Ok(sum) => sum == event.digest,
        Err(_) => false,
    }
}

fn is_boot_entry_name(name: &str) -> bool {
    name.len() == 8
        && name.starts_with("Boot")
        && name[4..].chars().all(|c| c.is_ascii_digit())
}

impl Boot {
    pub fn new() -> Boot {
        Boot {
            is_empty: true,
            ..Boot::default()
        }
    }

    /// Folds one typed event into the accumulated facts.
    pub fn consume(&mut self, event: &TypedEvent) -> Result<(), BootError> {
        self.is_empty = false;
        match event {
            TypedEvent::Separator(e) => self.process_separator(e),
            TypedEvent::CrtmContent(e) => self.process_crtm_content(e),
            TypedEvent::CompactHash(e) => self.process_dell_config(e),
            TypedEvent::Ipl(e) => {
                self.process_grub(e);
                self.process_shim(e);
                Ok(())
            }
            TypedEvent::NonhostInfo(e) => self.process_csme(e),
            TypedEvent::NonhostConfig(e) => self.process_amt_config(e),
            TypedEvent::VariableDriverConfig(e) => {
                self.process_secure_boot_variable(e)?;
                self.process_uefi_config(e)?;
                self.process_lenovo_config(e);
                Ok(())
            }
            TypedEvent::BootVariable(e) => {
                self.process_boot_variable(
                    &e.variable.event,
                    &e.variable.guid,
                    &e.variable.name,
                );
                Ok(())
            }
            TypedEvent::BootServicesApplication(e) => {
                self.process_boot_application(&e.event, &e.device_path);
                Ok(())
            }
            TypedEvent::UefiAction(e) => self.process_exit_boot_services(e),
            TypedEvent::Gpt(e) => {
                self.process_gpt(&e.event, &e.header, &e.partitions)
            }
            TypedEvent::PlatformFirmwareBlob(e) => {
                self.process_option_rom(&e.event, e.blob_base, e.blob_length);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Folds one IMA runtime measurement into the accumulated facts.
    pub fn consume_ima(&mut self, event: &ImaEvent) -> Result<(), BootError> {
        self.is_empty = false;
        // The all-zero template digest marks a file measured while open for
        // writing; its payload cannot be checked.
        if event.digest != [0u8; 20] {
            let tmpl = HashAlg::Sha1.hash(&event.data).unwrap_or_default();
            if tmpl != event.digest {
                return Err(BootError::Payload);
            }
        }

        let path = event.ng.as_ref().map(|ng| ng.path.as_str()).unwrap_or("");
        if path == "boot_aggregate" {
            if let Some(ng) = &event.ng {
                let h = DigestSet::new(&ng.file_digest)?;
                self.boot_aggregate.union_with(&h);
            }
        } else if path.starts_with('/') {
            let digest = DigestSet::new(&event.digest).unwrap_or_default();
            match self.files.get_mut(path) {
                Some(h) => {
                    h.replace_with(&digest);
                }
                None => {
                    self.files.insert(path.to_string(), digest);
                }
            }
        }
        Ok(())
    }

    fn past_separator(&self, event: &Event) -> bool {
        match self.separators.get(&event.index) {
            Some(sep) => match event.alg {
                HashAlg::Sha1 => !sep.sha1.is_empty(),
                HashAlg::Sha256 => !sep.sha256.is_empty(),
                HashAlg::Sha384 => false,
            },
            None => false,
        }
    }

    fn process_separator(&mut self, event: &Event) -> Result<(), BootError> {
        if event.index > 7 || self.past_separator(event) {
            return Ok(());
        }
        if !digest_matches(event, &event.data) {
            return Err(BootError::Payload);
        }
        if event.data != [0, 0, 0, 0] {
            return Ok(());
        }
        let sep = self.separators.entry(event.index).or_default();
        match event.alg {
            HashAlg::Sha1 => sep.sha1 = event.data.clone(),
            HashAlg::Sha256 => sep.sha256 = event.data.clone(),
            HashAlg::Sha384 => {}
        }
        Ok(())
    }

    fn process_crtm_content(
        &mut self,
        event: &StringEvent,
    ) -> Result<(), BootError> {
        if event.event.index != 0 || self.past_separator(&event.event) {
            return Ok(());
        }
        if event.message == BOOT_GUARD_SCRTM {
            self.boot_guard_ibb.union_with(&event_digest(&event.event));
        }
        Ok(())
    }

    fn process_dell_config(
        &mut self,
        event: &Event,
    ) -> Result<(), BootError> {
        if event.index != 1 || self.past_separator(event) {
            return Ok(());
        }
        if event.data == b"Dell Configuration Information 1"
            || event.data == b"Dell Configuration Information 2"
        {
            self.is_dell = true;
        }
        Ok(())
    }

    fn process_grub(&mut self, event: &StringEvent) {
        let msg = event.message.trim_end_matches('\u{0}');
        match event.event.index {
            8 => {
                let cmd: Vec<&str> = msg.split(' ').collect();
                if cmd.len() < 2 {
                    return;
                }
                match cmd[0] {
                    "grub_cmd:" => match cmd[1] {
                        "linux" => {
                            if self.linux_file.is_empty() && cmd.len() > 2 {
                                self.linux_file = cmd[2].to_string();
                            }
                        }
                        "initrd" => {
                            if self.initrd_file.is_empty() && cmd.len() > 2 {
                                self.initrd_file = cmd[2].to_string();
                            }
                        }
                        _ => {}
                    },
                    "kernel_cmdline:" => {
                        if self.linux_command.is_none() {
                            self.linux_command = Some(
                                cmd.get(3..)
                                    .unwrap_or_default()
                                    .iter()
                                    .map(|s| s.to_string())
                                    .collect(),
                            );
                        }
                    }
                    _ => {}
                }
            }
            9 => {
                if !self.linux_file.is_empty() && self.linux_file == msg {
                    self.linux_digest.union_with(&event_digest(&event.event));
                }
                if !self.initrd_file.is_empty() && self.initrd_file == msg {
                    self.initrd_digest
                        .union_with(&event_digest(&event.event));
                }
            }
            _ => {}
        }
    }

    fn process_shim(&mut self, event: &StringEvent) {
        if event.event.index != 14 {
            return;
        }
        match event.message.as_str() {
            "MokList\u{0}" => {
                self.mok_list.union_with(&event_digest(&event.event));
            }
            "MokListX\u{0}" => {
                self.mok_list_x.union_with(&event_digest(&event.event));
            }
            _ => {}
        }
    }

    /// EV_NONHOST_INFO events in PCR 0 and 2 carry either the CSME firmware
    /// info record or its measurement log. The measurement log is validated
    /// by replaying the extend register it covers before its entries are
    /// consumed.
    fn process_csme(&mut self, event: &Event) -> Result<(), BootError> {
        if self.past_separator(event) {
            return Ok(());
        }
        match event.index {
            0 | 2 => {
                if let Ok(info) = csme::parse_info_event(&event.data) {
                    if !digest_matches(event, &event.data) {
                        return Err(BootError::Payload);
                    }
                    self.csme_info = Some(info);
                } else if let Ok(measurements) =
                    csme::parse_measurement_event(&event.data)
                {
                    let er = measurements.er_alg.and_then(|alg| {
                        csme::replay_er(alg, false, &measurements.events)
                    });
                    if !event.digest.is_empty() {
                        match &er {
                            Some(er) if digest_matches(event, er) => {}
                            _ => return Err(BootError::Payload),
                        }
                    }
                    for inner in &measurements.events {
                        self.consume_csme_event(inner);
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// EV_NONHOST_CONFIG events in PCR 1 and 3 carry the AMT provisioning
    /// record.
    fn process_amt_config(&mut self, event: &Event) -> Result<(), BootError> {
        if self.past_separator(event) {
            return Ok(());
        }
        match event.index {
            1 | 3 => {
                if let Ok(cfg) = csme::parse_config_event(&event.data) {
                    if !digest_matches(event, &event.data) {
                        return Err(BootError::Payload);
                    }
                    self.amt_config = Some(cfg);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // First measurement wins for every CSME fact; a second measurement of
    // the same entity is part of the log but not of the boot state.
    fn consume_csme_event(&mut self, event: &csme::CsmeEvent) {
        match &event.payload {
            CsmePayload::ManifestVersion(version) => {
                self.csme_component_versions
                    .entry(event.entity)
                    .or_insert(*version);
            }
            CsmePayload::InitializeManifest
            | CsmePayload::ExtendManifest => {
                self.csme_component_hash
                    .entry(event.entity)
                    .or_insert_with(|| event.data.clone());
            }
            CsmePayload::OperationMode(mode) => {
                if self.csme_operation_mode.is_none() {
                    self.csme_operation_mode = Some(*mode);
                }
            }
            CsmePayload::SecurityParameters(params) => {
                if self.csme_security_parameters.is_none() {
                    self.csme_security_parameters = Some(*params);
                }
            }
            CsmePayload::OemCapabilities(_)
            | CsmePayload::SkuInformation(_)
            | CsmePayload::Opaque => {}
        }
    }

    fn process_boot_variable(
        &mut self,
        event: &Event,
        guid: &efi::EfiGuid,
        name: &str,
    ) {
        if event.index != 1 || self.past_separator(event) {
            return;
        }
        if *guid != EFI_GLOBAL_VARIABLE {
            return;
        }
        // Boot#### entries are skipped; every other variable, BootOrder
        // included, is tracked as a named variable and judged by the
        // boot-config check.
        if is_boot_entry_name(name)
            || self.boot_variables.contains_key(name)
        {
            return;
        }
        let mut val = DigestSet::default();
        val.union_with(&event_digest(event));
        self.boot_variables.insert(name.to_string(), val);
    }

    fn process_boot_application(&mut self, event: &Event, path: &str) {
        if event.index != 4 || !self.past_separator(event) {
            return;
        }
        self.boot_applications
            .entry(path.to_string())
            .or_default()
            .union_with(&event_digest(event));
    }

    fn process_exit_boot_services(
        &mut self,
        event: &StringEvent,
    ) -> Result<(), BootError> {
        if event.event.index != 5 || !self.past_separator(&event.event) {
            return Ok(());
        }
        if !digest_matches(&event.event, &event.event.data) {
            return Err(BootError::Payload);
        }
        match self.exit_boot_services {
            ExitBootServices::Pre => {
                if event.message == "Exit Boot Services Invocation" {
                    self.exit_boot_services = ExitBootServices::Running;
                }
            }
            ExitBootServices::Running => {
                if event.message
                    == "Exit Boot Services Returned with Success"
                {
                    self.exit_boot_services = ExitBootServices::Done;
                }
            }
            ExitBootServices::Done => {}
        }
        Ok(())
    }

    fn process_gpt(
        &mut self,
        event: &Event,
        header: &Option<EfiPartitionTableHeader>,
        partitions: &[EfiPartition],
    ) -> Result<(), BootError> {
        if event.index != 5 || !self.past_separator(event) {
            return Ok(());
        }
        if !digest_matches(event, &event.data) {
            return Err(BootError::Payload);
        }
        self.gpt.union_with(&event_digest(event));
        self.partitions = partitions.to_vec();
        self.partition_table_header = header.clone();
        Ok(())
    }

    fn process_option_rom(
        &mut self,
        event: &Event,
        blob_base: u64,
        blob_length: u64,
    ) {
        if event.index != 0 || self.past_separator(event) {
            return;
        }
        // Only blobs in the memory-mapped flash window are firmware volumes
        // embedded in the system flash.
        if blob_base < 0xff00_0000
            || blob_base + blob_length >= 0x1_0000_0000
        {
            return;
        }
        let addr = format!("{blob_base:x}");
        self.embedded_firmware
            .entry(addr)
            .or_default()
            .union_with(&event_digest(event));
    }

    fn process_secure_boot_variable(
        &mut self,
        event: &UefiVariableEvent,
    ) -> Result<(), BootError> {
        if event.event.index != 7 || self.past_separator(&event.event) {
            return Ok(());
        }
        if !digest_matches(&event.event, &event.event.data) {
            return Err(BootError::Payload);
        }
        if event.guid == EFI_IMAGE_SECURITY_DATABASE {
            match event.name.as_str() {
                "db" => {
                    self.db.union_with(&event_digest(&event.event));
                }
                "dbx" => {
                    if let Ok((certs, hashes)) =
                        efi::parse_signature_list(&event.data)
                    {
                        self.dbx_contents = HashMap::new();
                        for cert in certs {
                            if let Ok(fpr) = cert
                                .to_der()
                                .map_err(efi::EfiError::from)
                                .and_then(|der| efi::tbs_fingerprint(&der))
                            {
                                self.dbx_contents
                                    .insert(hex::encode(fpr), true);
                            }
                        }
                        for h in hashes {
                            self.dbx_contents.insert(hex::encode(h), true);
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
        if event.guid == EFI_GLOBAL_VARIABLE {
            match event.name.as_str() {
                "SecureBoot" => {
                    if event.data.len() == 1 {
                        self.secure_boot = Some(event.data[0]);
                    }
                }
                "AuditMode" => {
                    if event.data.len() == 1 {
                        self.audit_mode = Some(event.data[0]);
                    }
                }
                "DeployedMode" => {
                    if event.data.len() == 1 {
                        self.deployed_mode = Some(event.data[0]);
                    }
                }
                "SetupMode" => {
                    if event.data.len() == 1 {
                        self.setup_mode = Some(event.data[0]);
                    }
                }
                "PK" => {
                    if self.pk_parsed.is_none() {
                        if let Ok(pk) = X509::from_der(&event.data) {
                            self.pk_parsed = Some(pk);
                        }
                    }
                    self.pk.union_with(&event_digest(&event.event));
                }
                "KEK" => {
                    if let Ok((certs, _)) =
                        efi::parse_signature_list(&event.data)
                    {
                        self.kek_parsed.extend(certs);
                    }
                    self.kek.union_with(&event_digest(&event.event));
                }
                _ => return Ok(()),
            }
        }
        Ok(())
    }

    fn process_uefi_config(
        &mut self,
        event: &UefiVariableEvent,
    ) -> Result<(), BootError> {
        if event.event.index != 1 || self.past_separator(&event.event) {
            return Ok(());
        }
        if !digest_matches(&event.event, &event.event.data) {
            return Err(BootError::Payload);
        }
        if event.guid == UEFI_SETUP_GUID && event.name == "Setup" {
            self.setup.union_with(&event_digest(&event.event));
        }
        Ok(())
    }

    fn process_lenovo_config(&mut self, event: &UefiVariableEvent) {
        if event.event.index != 1 || self.past_separator(&event.event) {
            return;
        }
        if event.guid == LENOVO_CONFIG_GUID
            && event.name == "LenovoSecurityConfig"
        {
            self.is_lenovo = true;
        }
    }
}
