//! End-to-end tests: seal a directory, unseal it again, and check what is
//! left on disk after failures.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use sealpipe_chunks::{compress_to, CompressOptions};
use sealpipe_core::SealError;
use sealpipe_crypto::{
    derive_key, EnvelopeCipher, EnvelopeHeader, KdfParams, KeyOrigin, SealKey, HEADER_SIZE,
};
use sealpipe_pipeline::engine::SCRATCH_PREFIX;
use sealpipe_pipeline::{
    decrypt_dir, encrypt_dir, KeySource, PassphraseKeys, Pipeline, PipelineConfig,
};
use secrecy::SecretString;
use tempfile::TempDir;

const MIB: usize = 1024 * 1024;

fn key() -> SealKey {
    SealKey::from_bytes([0x5a; 32])
}

fn pipeline(keep_sealed: bool) -> Pipeline {
    Pipeline::new(PipelineConfig {
        keep_sealed,
        ..PipelineConfig::default()
    })
    .unwrap()
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

#[test]
fn directory_roundtrip_preserves_every_file() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input");
    let sealed = tmp.path().join("sealed");
    let restored = tmp.path().join("restored");
    fs::create_dir_all(&input).unwrap();

    let files: Vec<(&str, Vec<u8>)> = vec![
        ("empty.bin", Vec::new()),
        ("hello.txt", b"hello world".to_vec()),
        ("text.log", b"line of log output\n".repeat(20_000)),
        ("noise.dat", pseudo_random(300_000, 7)),
    ];
    for (name, data) in &files {
        fs::write(input.join(name), data).unwrap();
    }

    let p = pipeline(false);
    let cipher = EnvelopeCipher::new(key(), KeyOrigin::raw());
    let summary = encrypt_dir(&p, &cipher, &input, &sealed, None).unwrap();
    assert_eq!(summary.total(), files.len());
    assert!(summary.is_clean());
    assert_eq!(
        names_in(&sealed),
        vec!["empty.bin.sealed", "hello.txt.sealed", "noise.dat.sealed", "text.log.sealed"]
    );

    let summary = decrypt_dir(&p, &KeySource::Key(key()), &sealed, &restored, None).unwrap();
    assert!(summary.is_clean());
    for (name, data) in &files {
        assert_eq!(&fs::read(restored.join(name)).unwrap(), data, "{name}");
    }
    // Envelopes are consumed by a successful unseal.
    assert!(names_in(&sealed).is_empty());
}

#[test]
fn ten_mib_file_matches_in_memory_reference() {
    let tmp = TempDir::new().unwrap();
    let data = pseudo_random(10 * MIB, 42);
    let src = tmp.path().join("big.bin");
    fs::write(&src, &data).unwrap();

    let p = pipeline(true);
    let cipher = EnvelopeCipher::new(key(), KeyOrigin::raw());
    let report = p.encrypt_file(&cipher, &src, tmp.path()).unwrap();
    assert_eq!(report.original_size, data.len() as u64);
    let on_disk = fs::read(&report.output).unwrap();

    // Same stages, entirely in memory, with the nonce prefix the file used
    let header_bytes: [u8; HEADER_SIZE] = on_disk[..HEADER_SIZE].try_into().unwrap();
    let header = EnvelopeHeader::from_bytes(&header_bytes).unwrap();
    let mut compressed = Vec::new();
    compress_to(data.as_slice(), &mut compressed, CompressOptions::default()).unwrap();
    let mut reference = Vec::new();
    cipher
        .encrypt_stream_with_nonce_prefix(header.nonce_prefix, compressed.as_slice(), &mut reference)
        .unwrap();
    assert_eq!(on_disk, reference);

    let out = tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();
    p.decrypt_file(&KeySource::Key(key()), &report.output, &out).unwrap();
    assert_eq!(fs::read(out.join("big.bin")).unwrap(), data);
}

#[test]
fn tampered_envelope_is_rejected_without_output() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("secret.txt");
    fs::write(&src, b"attack at dawn, bring snacks".repeat(100)).unwrap();

    let p = pipeline(true);
    let cipher = EnvelopeCipher::new(key(), KeyOrigin::raw());
    let sealed = p.encrypt_file(&cipher, &src, tmp.path()).unwrap().output;
    let pristine = fs::read(&sealed).unwrap();

    let out = tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();
    for offset in [0, 10, HEADER_SIZE + 2, HEADER_SIZE + 7, pristine.len() - 1] {
        let mut bytes = pristine.clone();
        bytes[offset] ^= 0x01;
        fs::write(&sealed, &bytes).unwrap();

        let result = p.decrypt_file(&KeySource::Key(key()), &sealed, &out);
        assert!(
            matches!(result, Err(SealError::AuthenticationFailure(_))),
            "flip at {offset}: {result:?}"
        );
        assert!(names_in(&out).is_empty(), "flip at {offset} left files behind");
    }
}

#[test]
fn wrong_key_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("a.txt");
    fs::write(&src, b"payload").unwrap();

    let p = pipeline(true);
    let sealed = p
        .encrypt_file(&EnvelopeCipher::new(key(), KeyOrigin::raw()), &src, tmp.path())
        .unwrap()
        .output;

    let out = tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();
    let other = KeySource::Key(SealKey::from_bytes([0x5b; 32]));
    assert!(matches!(
        p.decrypt_file(&other, &sealed, &out),
        Err(SealError::AuthenticationFailure(_))
    ));
    assert!(names_in(&out).is_empty());
}

#[test]
fn batch_continues_past_a_failing_file() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input");
    let sealed = tmp.path().join("sealed");
    let restored = tmp.path().join("restored");
    fs::create_dir_all(&input).unwrap();
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(input.join(name), format!("contents of {name}")).unwrap();
    }

    let p = pipeline(false);
    let cipher = EnvelopeCipher::new(key(), KeyOrigin::raw());
    encrypt_dir(&p, &cipher, &input, &sealed, None).unwrap();

    // Truncate the middle envelope
    let victim = sealed.join("b.txt.sealed");
    let bytes = fs::read(&victim).unwrap();
    fs::write(&victim, &bytes[..bytes.len() - 5]).unwrap();

    let summary = decrypt_dir(&p, &KeySource::Key(key()), &sealed, &restored, None).unwrap();
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    let (path, err) = summary.failures().next().unwrap();
    assert_eq!(path, victim.as_path());
    assert!(matches!(err, SealError::AuthenticationFailure(_)));

    assert_eq!(names_in(&restored), vec!["a.txt", "c.txt"]);
    // Only the failed envelope remains.
    assert_eq!(names_in(&sealed), vec!["b.txt.sealed"]);
    assert!(!names_in(&restored).iter().any(|n| n.starts_with(SCRATCH_PREFIX)));
}

#[test]
fn passphrase_batch_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("input");
    let sealed = tmp.path().join("sealed");
    let restored = tmp.path().join("restored");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("one.txt"), b"first").unwrap();
    fs::write(input.join("two.txt"), b"second").unwrap();

    let passphrase = SecretString::from("a passphrase nobody will guess");
    let params = KdfParams { iterations: 2_000 };
    let salt = sealpipe_crypto::generate_salt();
    let key = derive_key(&passphrase, &salt, b"box|x86_64|linux", &params).unwrap();
    let cipher = EnvelopeCipher::new(key, KeyOrigin::derived(salt, &params));

    let p = pipeline(false);
    encrypt_dir(&p, &cipher, &input, &sealed, None).unwrap();

    let keys = KeySource::Passphrase(
        PassphraseKeys::new(passphrase, b"box|x86_64|linux".to_vec())
            .with_iteration_range(1_000..=2_000),
    );
    let summary = decrypt_dir(&p, &keys, &sealed, &restored, None).unwrap();
    assert!(summary.is_clean());
    assert_eq!(fs::read(restored.join("one.txt")).unwrap(), b"first");
    assert_eq!(fs::read(restored.join("two.txt")).unwrap(), b"second");
}

#[test]
fn tampered_iteration_count_fails_fast_in_passphrase_mode() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("ledger.csv");
    fs::write(&src, b"date,amount\n2026-01-01,12.50\n").unwrap();
    let out = tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();

    let passphrase = SecretString::from("hunter2 but longer");
    let params = KdfParams { iterations: 1_000 };
    let salt = sealpipe_crypto::generate_salt();
    let key = derive_key(&passphrase, &salt, b"ctx", &params).unwrap();
    let cipher = EnvelopeCipher::new(key, KeyOrigin::derived(salt, &params));

    let p = pipeline(true);
    let sealed = p.encrypt_file(&cipher, &src, tmp.path()).unwrap().output;
    let keys = KeySource::Passphrase(
        PassphraseKeys::new(passphrase, b"ctx".to_vec()).with_iteration_range(1_000..=1_000),
    );

    // Header bytes 5..9 hold the iteration count (u32 BE).
    let pristine = fs::read(&sealed).unwrap();
    for (offset, mask) in [(5, 0x01), (6, 0x80), (8, 0x01)] {
        let mut bytes = pristine.clone();
        bytes[offset] ^= mask;
        fs::write(&sealed, &bytes).unwrap();

        let started = Instant::now();
        let result = p.decrypt_file(&keys, &sealed, &out);
        assert!(
            matches!(result, Err(SealError::AuthenticationFailure(_))),
            "flip {mask:#x} at {offset}: {result:?}"
        );
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "flip {mask:#x} at {offset} ran the KDF for {:?}",
            started.elapsed()
        );
        assert!(names_in(&out).is_empty());
    }

    fs::write(&sealed, &pristine).unwrap();
    p.decrypt_file(&keys, &sealed, &out).unwrap();
    assert_eq!(
        fs::read(out.join("ledger.csv")).unwrap(),
        b"date,amount\n2026-01-01,12.50\n"
    );
}

mod prop {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn any_file_survives_the_pipeline(
            data in proptest::collection::vec(any::<u8>(), 0..=20_000),
            chunk_size in 512usize..=8192,
        ) {
            let tmp = TempDir::new().unwrap();
            let src = tmp.path().join("blob");
            fs::write(&src, &data).unwrap();
            let out = tmp.path().join("out");
            fs::create_dir_all(&out).unwrap();

            let p = Pipeline::new(PipelineConfig {
                chunk_size,
                ..PipelineConfig::default()
            })
            .unwrap();
            let cipher = EnvelopeCipher::new(key(), KeyOrigin::raw())
                .with_chunk_size(chunk_size)
                .unwrap();

            let sealed = p.encrypt_file(&cipher, &src, tmp.path()).unwrap().output;
            p.decrypt_file(&KeySource::Key(key()), &sealed, &out).unwrap();
            prop_assert_eq!(fs::read(out.join("blob")).unwrap(), data);
        }
    }
}
