#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::ZipWriter;

const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";
const NO_INDEX: u32 = 0xFFFF_FFFF;
const TYPE_STRING: u8 = 0x03;

/// Builds a compiled `AndroidManifest.xml` the way aapt lays it out:
/// UTF-16 string pool first, then start/end element chunks.
#[derive(Default)]
pub struct ManifestBuilder {
    strings: Vec<String>,
    chunks: Vec<Vec<u8>>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, value: &str) -> u32 {
        if let Some(index) = self.strings.iter().position(|s| s == value) {
            return index as u32;
        }
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    /// `attrs` are android-namespaced string attributes, except `package`.
    pub fn start(mut self, name: &str, attrs: &[(&str, &str)]) -> Self {
        let name_index = self.intern(name);
        let ns_index = self.intern(ANDROID_NS);
        let encoded: Vec<(u32, u32, u32)> = attrs
            .iter()
            .map(|(attr, value)| {
                let ns = if *attr == "package" { NO_INDEX } else { ns_index };
                (ns, self.intern(attr), self.intern(value))
            })
            .collect();

        let mut chunk = Vec::new();
        chunk.extend_from_slice(&0x0102u16.to_le_bytes());
        chunk.extend_from_slice(&16u16.to_le_bytes());
        chunk.extend_from_slice(&((16 + 20 + encoded.len() * 20) as u32).to_le_bytes());
        chunk.extend_from_slice(&1u32.to_le_bytes());
        chunk.extend_from_slice(&NO_INDEX.to_le_bytes());
        chunk.extend_from_slice(&NO_INDEX.to_le_bytes());
        chunk.extend_from_slice(&name_index.to_le_bytes());
        chunk.extend_from_slice(&20u16.to_le_bytes());
        chunk.extend_from_slice(&20u16.to_le_bytes());
        chunk.extend_from_slice(&(encoded.len() as u16).to_le_bytes());
        chunk.extend_from_slice(&[0u8; 6]);
        for (ns, attr, value) in encoded {
            chunk.extend_from_slice(&ns.to_le_bytes());
            chunk.extend_from_slice(&attr.to_le_bytes());
            chunk.extend_from_slice(&value.to_le_bytes());
            chunk.extend_from_slice(&8u16.to_le_bytes());
            chunk.push(0);
            chunk.push(TYPE_STRING);
            chunk.extend_from_slice(&value.to_le_bytes());
        }
        self.chunks.push(chunk);
        self
    }

    pub fn end(mut self, name: &str) -> Self {
        let name_index = self.intern(name);
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&0x0103u16.to_le_bytes());
        chunk.extend_from_slice(&16u16.to_le_bytes());
        chunk.extend_from_slice(&24u32.to_le_bytes());
        chunk.extend_from_slice(&1u32.to_le_bytes());
        chunk.extend_from_slice(&NO_INDEX.to_le_bytes());
        chunk.extend_from_slice(&NO_INDEX.to_le_bytes());
        chunk.extend_from_slice(&name_index.to_le_bytes());
        self.chunks.push(chunk);
        self
    }

    /// Self-closing element.
    pub fn leaf(self, name: &str, attrs: &[(&str, &str)]) -> Self {
        self.start(name, attrs).end(name)
    }

    fn string_pool(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let mut offsets = Vec::new();
        for s in &self.strings {
            offsets.push(body.len() as u32);
            let units: Vec<u16> = s.encode_utf16().collect();
            body.extend_from_slice(&(units.len() as u16).to_le_bytes());
            for unit in units {
                body.extend_from_slice(&unit.to_le_bytes());
            }
            body.extend_from_slice(&0u16.to_le_bytes());
        }
        while body.len() % 4 != 0 {
            body.push(0);
        }
        let header = 28usize;
        let strings_start = header + offsets.len() * 4;
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&0x0001u16.to_le_bytes());
        chunk.extend_from_slice(&(header as u16).to_le_bytes());
        chunk.extend_from_slice(&((strings_start + body.len()) as u32).to_le_bytes());
        chunk.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        chunk.extend_from_slice(&0u32.to_le_bytes());
        chunk.extend_from_slice(&0u32.to_le_bytes());
        chunk.extend_from_slice(&(strings_start as u32).to_le_bytes());
        chunk.extend_from_slice(&0u32.to_le_bytes());
        for offset in offsets {
            chunk.extend_from_slice(&offset.to_le_bytes());
        }
        chunk.extend_from_slice(&body);
        chunk
    }

    pub fn build(self) -> Vec<u8> {
        let mut body = self.string_pool();
        for chunk in &self.chunks {
            body.extend_from_slice(chunk);
        }
        let mut doc = Vec::new();
        doc.extend_from_slice(&0x0003u16.to_le_bytes());
        doc.extend_from_slice(&8u16.to_le_bytes());
        doc.extend_from_slice(&((8 + body.len()) as u32).to_le_bytes());
        doc.extend_from_slice(&body);
        doc
    }
}

/// Minimal manifest: package, permissions and one launcher-less activity per name.
pub fn manifest(package: &str, permissions: &[&str], activities: &[&str]) -> Vec<u8> {
    let mut builder = ManifestBuilder::new().start("manifest", &[("package", package)]);
    for permission in permissions {
        builder = builder.leaf("uses-permission", &[("name", permission)]);
    }
    builder = builder.start("application", &[("label", "Fixture")]);
    for activity in activities {
        builder = builder.leaf("activity", &[("name", activity)]);
    }
    builder.end("application").end("manifest").build()
}

/// Zip `manifest` into an APK alongside a placeholder dex.
pub fn write_apk(path: &Path, manifest: &[u8]) -> PathBuf {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    zip.start_file("AndroidManifest.xml", FileOptions::default())
        .unwrap();
    zip.write_all(manifest).unwrap();
    zip.start_file("classes.dex", FileOptions::default()).unwrap();
    zip.write_all(b"dex\n035\0").unwrap();
    zip.finish().unwrap();
    path.to_path_buf()
}

pub fn write_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> PathBuf {
    let mut text = header.join(",");
    text.push('\n');
    for row in rows {
        text.push_str(&row.join(","));
        text.push('\n');
    }
    fs::write(path, text).unwrap();
    path.to_path_buf()
}

pub const SEND_SMS: &str = "android.permission.SEND_SMS";
pub const INTERNET: &str = "android.permission.INTERNET";
pub const BOOT: &str = "android.permission.RECEIVE_BOOT_COMPLETED";

/// Three training tables over 30 apps: SMS malware (3) sends SMS, adware (1)
/// starts at boot, benign (5) only uses the network. Syscall counts carry no
/// signal, so only static columns separate the classes.
pub fn write_training_tables(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let mut static_rows = Vec::new();
    let mut syscall_rows = Vec::new();
    let mut binder_rows = Vec::new();
    for i in 0..30 {
        let (class, sms, boot) = match i % 3 {
            0 => (3, 1, 0),
            1 => (1, 0, 1),
            _ => (5, 0, 0),
        };
        static_rows.push(vec![
            sms.to_string(),
            "1".to_string(),
            boot.to_string(),
            (1000 + i).to_string(),
            class.to_string(),
        ]);
        syscall_rows.push(vec!["0".to_string(), "0".to_string()]);
        binder_rows.push(vec!["0".to_string(), "0".to_string(), class.to_string()]);
    }
    (
        write_csv(
            &dir.join("static.csv"),
            &[SEND_SMS, INTERNET, BOOT, "file_size", "Class"],
            &static_rows,
        ),
        write_csv(&dir.join("syscalls.csv"), &["read", "write"], &syscall_rows),
        write_csv(
            &dir.join("syscalls_binders.csv"),
            &["read", "ioctl", "Class"],
            &binder_rows,
        ),
    )
}
