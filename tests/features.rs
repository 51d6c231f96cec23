mod common;

use std::collections::HashSet;

use apk_triage::apk::{resolve_component_name, ApkDescriptor};
use apk_triage::vectorize::reconcile_width_strict;
use apk_triage::{
    build_feature_vector, extract_static_features, reconcile_width, ApkParseError,
    FeatureVocabulary, Reconciliation,
};
use proptest::prelude::*;
use tempfile::TempDir;

use common::{write_apk, ManifestBuilder, INTERNET, SEND_SMS};

fn attributes(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn permission_present_sets_only_its_position() {
    let vocab = FeatureVocabulary::from_names([SEND_SMS, INTERNET, "syscall_read_freq"]);
    let vector = build_feature_vector(&vocab, &attributes(&[SEND_SMS]));
    assert_eq!(vector, vec![1.0, 0.0, 0.0]);
}

#[test]
fn narrow_vector_is_zero_padded() {
    let mut vector = vec![0.0; 139];
    vector[0] = 1.0;
    vector[138] = 1.0;
    let (out, action) = reconcile_width(vector.clone(), 150);
    assert_eq!(out.len(), 150);
    assert_eq!(&out[..139], &vector[..]);
    assert!(out[139..].iter().all(|v| *v == 0.0));
    assert_eq!(action, Reconciliation::Padded { added: 11 });
}

#[test]
fn wide_vector_is_truncated() {
    let vector: Vec<f64> = (0..150).map(|i| (i % 2) as f64).collect();
    let (out, action) = reconcile_width(vector.clone(), 139);
    assert_eq!(out, vector[..139].to_vec());
    assert_eq!(action, Reconciliation::Truncated { dropped: 11 });
    assert!(reconcile_width_strict(vector, 139).is_err());
}

#[test]
fn extracts_every_component_kind_from_apk() {
    let manifest = ManifestBuilder::new()
        .start("manifest", &[("package", "com.example.sms")])
        .leaf("uses-permission", &[("name", SEND_SMS)])
        .leaf("uses-permission-sdk-23", &[("name", INTERNET)])
        .start("application", &[("label", "Example")])
        .start("activity", &[("name", ".MainActivity")])
        .start("intent-filter", &[])
        .leaf("action", &[("name", "android.intent.action.MAIN")])
        .end("intent-filter")
        .end("activity")
        .start("receiver", &[("name", "BootReceiver")])
        .start("intent-filter", &[])
        .leaf("action", &[("name", "android.intent.action.BOOT_COMPLETED")])
        .end("intent-filter")
        .end("receiver")
        .leaf("service", &[("name", "com.other.SyncService")])
        .leaf("provider", &[("name", ".data.Provider")])
        .end("application")
        .end("manifest")
        .build();
    let dir = TempDir::new().unwrap();
    let apk = write_apk(&dir.path().join("sms.apk"), &manifest);

    let descriptor = ApkDescriptor::from_path(&apk).unwrap();
    assert_eq!(descriptor.package.as_deref(), Some("com.example.sms"));
    assert!(descriptor.permissions.contains(SEND_SMS));
    assert!(descriptor.permissions.contains(INTERNET));
    assert!(descriptor.activities.contains("com.example.sms.MainActivity"));
    assert!(descriptor.receivers.contains("com.example.sms.BootReceiver"));
    assert!(descriptor.services.contains("com.other.SyncService"));
    assert!(descriptor.providers.contains("com.example.sms.data.Provider"));
    // Only activity intent filters contribute actions.
    assert_eq!(
        descriptor.intent_actions.iter().collect::<Vec<_>>(),
        ["android.intent.action.MAIN"]
    );

    let features = extract_static_features(&apk).unwrap();
    assert_eq!(features.len(), 7);
    assert!(features.contains("android.intent.action.MAIN"));
}

#[test]
fn component_names_resolve_against_package() {
    assert_eq!(resolve_component_name(Some("a.b"), ".Main"), "a.b.Main");
    assert_eq!(resolve_component_name(Some("a.b"), "Main"), "a.b.Main");
    assert_eq!(resolve_component_name(Some("a.b"), "x.y.Main"), "x.y.Main");
    assert_eq!(resolve_component_name(None, ".Main"), ".Main");
}

#[test]
fn apk_without_manifest_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.apk");
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file("classes.dex", zip::write::FileOptions::default())
        .unwrap();
    zip.finish().unwrap();

    let err = extract_static_features(&path).unwrap_err();
    assert!(matches!(err, ApkParseError::MissingManifest));
}

#[test]
fn oversized_chunk_header_is_a_parse_error() {
    let mut manifest = Vec::new();
    manifest.extend_from_slice(&0x0003u16.to_le_bytes());
    manifest.extend_from_slice(&8u16.to_le_bytes());
    manifest.extend_from_slice(&20u32.to_le_bytes());
    manifest.extend_from_slice(&0x0180u16.to_le_bytes());
    manifest.extend_from_slice(&256u16.to_le_bytes());
    manifest.extend_from_slice(&12u32.to_le_bytes());
    manifest.extend_from_slice(&0x0101_0003u32.to_le_bytes());
    let dir = TempDir::new().unwrap();
    let apk = write_apk(&dir.path().join("crafted.apk"), &manifest);

    let err = extract_static_features(&apk).unwrap_err();
    assert!(matches!(err, ApkParseError::Xml { .. }));
}

#[test]
fn non_zip_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.apk");
    std::fs::write(&path, b"definitely not a zip archive").unwrap();
    let err = extract_static_features(&path).unwrap_err();
    assert!(matches!(err, ApkParseError::Archive(_)));
}

#[test]
fn vocabulary_survives_text_artifact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("feature_names.txt");
    let vocab = FeatureVocabulary::from_names([SEND_SMS, "read", "ioctl", INTERNET]);
    vocab.save(&path).unwrap();
    let mut text = std::fs::read_to_string(&path).unwrap();
    text.push_str("\n\n");
    std::fs::write(&path, text).unwrap();

    assert_eq!(FeatureVocabulary::load(&path).unwrap(), vocab);
}

fn vocab_and_attributes() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    (
        prop::collection::vec("[a-z.]{1,12}", 0..40),
        prop::collection::vec("[a-z.]{1,12}", 0..20),
    )
}

proptest! {
    #[test]
    fn builder_is_binary_and_fits_vocabulary((names, attrs) in vocab_and_attributes()) {
        let vocab = FeatureVocabulary::from_names(&names);
        let attrs: HashSet<String> = attrs.into_iter().collect();
        let vector = build_feature_vector(&vocab, &attrs);
        prop_assert_eq!(vector.len(), vocab.len());
        prop_assert!(vector.iter().all(|v| *v == 0.0 || *v == 1.0));
        for (name, value) in vocab.names().iter().zip(&vector) {
            prop_assert_eq!(*value == 1.0, attrs.contains(name));
        }
        prop_assert_eq!(build_feature_vector(&vocab, &attrs), vector);
    }

    #[test]
    fn reconciler_always_hits_target(
        vector in prop::collection::vec(0.0f64..1.0, 0..64),
        target in 0usize..64,
    ) {
        let (out, _) = reconcile_width(vector.clone(), target);
        prop_assert_eq!(out.len(), target);
        let kept = vector.len().min(target);
        prop_assert_eq!(&out[..kept], &vector[..kept]);
        prop_assert!(out[kept..].iter().all(|v| *v == 0.0));
    }
}
