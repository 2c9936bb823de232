use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use mavenize::zip::ZipParser;
use mavenize::{FixedClock, LocalFileReader, RepackConfig, Repackager};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project>
  <modelVersion>4.0.0</modelVersion>
  <groupId>g</groupId>
  <artifactId>a</artifactId>
  <version>1.0</version>
</project>
"#;

const STAMP: &str = "Mon Oct 16 12:00:00 UTC 2026";

fn built_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 16)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn repackager() -> Repackager<FixedClock> {
    Repackager::new(FixedClock::new(STAMP, built_at()))
}

/// Write a JAR the way common tools do: deflated entries streamed with
/// data descriptors, plus a directory entry.
fn write_jar(path: &Path, comment: Option<&str>) {
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut jar = ZipWriter::new_stream(File::create(path).unwrap());
    jar.add_directory("META-INF/", stored).unwrap();
    jar.start_file("META-INF/MANIFEST.MF", deflated).unwrap();
    jar.write_all(b"Manifest-Version: 1.0\r\nCreated-By: bazel\r\n")
        .unwrap();
    jar.start_file("com/example/Main.class", deflated).unwrap();
    jar.write_all(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52]).unwrap();
    jar.start_file("com/example/data.txt", deflated).unwrap();
    jar.write_all(&b"lorem ipsum ".repeat(200)).unwrap();
    if let Some(comment) = comment {
        jar.set_comment(comment);
    }
    jar.finish().unwrap();
}

fn make_jar(path: &Path) {
    write_jar(path, None);
}

/// Entry names and contents as the `zip` crate reads them
fn entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        out.push((file.name().to_string(), data));
    }
    out
}

#[tokio::test]
async fn adds_two_entries_and_keeps_the_rest() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    make_jar(&input);
    std::fs::write(&pom, POM).unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    let summary = repackager().run(&config).await.unwrap();
    assert_eq!(summary.pom_entry, "META-INF/maven/g/a/pom.xml");
    assert_eq!(summary.properties_entry, "META-INF/maven/g/a/pom.properties");
    assert_eq!(summary.total_entries, 6);

    let before = entries(&input);
    let after = entries(&output);
    assert_eq!(after.len(), before.len() + 2);
    assert_eq!(&after[..before.len()], &before[..]);

    assert_eq!(after[4].0, "META-INF/maven/g/a/pom.xml");
    assert_eq!(after[4].1, POM.as_bytes());
    assert_eq!(after[5].0, "META-INF/maven/g/a/pom.properties");
    assert_eq!(
        String::from_utf8(after[5].1.clone()).unwrap(),
        format!("#Generated by Bazel\n#{STAMP}\nversion=1.0\ngroupId=g\nartifactId=a")
    );
}

#[tokio::test]
async fn input_bytes_are_a_prefix_of_the_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    make_jar(&input);
    std::fs::write(&pom, POM).unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    repackager().run(&config).await.unwrap();

    // Everything up to the old central directory is untouched
    let original = std::fs::read(&input).unwrap();
    let repacked = std::fs::read(&output).unwrap();
    let parser = ZipParser::new(Arc::new(LocalFileReader::new(&input).unwrap()));
    let cd = parser.locate_central_directory().await.unwrap().unwrap();
    let local_end = cd.start as usize;
    assert!(local_end > 0);
    assert_eq!(&repacked[..local_end], &original[..local_end]);

    // and the old central records reappear verbatim after the new data
    let old_cd = parser.read_central_directory(&cd).await.unwrap();
    assert!(repacked[local_end..].windows(old_cd.len()).any(|w| w == old_cd.as_slice()));
}

#[tokio::test]
async fn descriptor_formatting_is_preserved() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    make_jar(&input);
    let crlf = "<project>\r\n\t<modelVersion>4.0.0</modelVersion>\r\n\t<groupId>org.acme</groupId>\r\n\t<artifactId>rocket</artifactId>\r\n\t<version>2.0.0-rc1</version>\r\n</project>";
    std::fs::write(&pom, crlf).unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    repackager().run(&config).await.unwrap();

    let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
    let mut entry = archive
        .by_name("META-INF/maven/org.acme/rocket/pom.xml")
        .unwrap();
    assert_eq!(entry.compression(), CompressionMethod::Stored);
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    assert_eq!(data, crlf.as_bytes());
    drop(entry);

    // DOS date of the injected entry: 2026-10-16
    let parser = ZipParser::new(Arc::new(LocalFileReader::new(&output).unwrap()));
    let cd = parser.locate_central_directory().await.unwrap().unwrap();
    let records = parser.read_central_directory(&cd).await.unwrap();
    let injected = &parser.parse_entries(&cd, &records).unwrap()[4];
    let date = injected.last_mod_date;
    assert_eq!(((date >> 9) + 1980, (date >> 5) & 0x0F, date & 0x1F), (2026, 10, 16));
}

#[tokio::test]
async fn bad_descriptor_leaves_a_plain_copy() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    make_jar(&input);
    std::fs::write(&pom, "<project><modelVersion>4.0.0</modelVersion><groupId>g</groupId></project>").unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    assert!(repackager().run(&config).await.is_err());

    assert_eq!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
}

#[tokio::test]
async fn missing_input_creates_no_output() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    std::fs::write(&pom, POM).unwrap();

    let config = RepackConfig::new(&output, dir.path().join("missing.jar"), &pom).unwrap();
    let err = repackager().run(&config).await.unwrap_err();
    assert!(format!("{err:#}").contains("missing.jar"));
    assert!(!output.exists());
}

#[tokio::test]
async fn missing_descriptor_is_an_error() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    make_jar(&input);

    let config = RepackConfig::new(&output, &input, dir.path().join("pom.xml")).unwrap();
    let err = repackager().run(&config).await.unwrap_err();
    assert!(format!("{err:#}").contains("pom.xml"));
}

#[tokio::test]
async fn existing_output_is_overwritten() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    make_jar(&input);
    std::fs::write(&pom, POM).unwrap();
    std::fs::write(&output, vec![b'x'; 100_000]).unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    repackager().run(&config).await.unwrap();

    assert_eq!(entries(&output).len(), 6);
    assert!(std::fs::metadata(&output).unwrap().len() < 100_000);
}

#[tokio::test]
async fn two_runs_produce_the_same_entries() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let pom = dir.path().join("pom.xml");
    make_jar(&input);
    std::fs::write(&pom, POM).unwrap();

    let first = dir.path().join("first.jar");
    let second = dir.path().join("second.jar");
    for output in [&first, &second] {
        let config = RepackConfig::new(output, &input, &pom).unwrap();
        repackager().run(&config).await.unwrap();
    }

    assert_eq!(entries(&first), entries(&second));
    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}

#[tokio::test]
async fn archive_comment_and_launcher_stub_survive() {
    let dir = tempdir().unwrap();
    let plain = dir.path().join("plain.jar");
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    std::fs::write(&pom, POM).unwrap();

    // Launcher stub in front, comment at the back
    let stub = b"#!/bin/sh\nexec java -jar \"$0\" \"$@\"\n";
    let comment = b"release build";
    write_jar(&plain, Some("release build"));
    let mut bytes = stub.to_vec();
    bytes.extend(std::fs::read(&plain).unwrap());
    std::fs::write(&input, &bytes).unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    repackager().run(&config).await.unwrap();

    let repacked = std::fs::read(&output).unwrap();
    assert!(repacked.starts_with(stub));
    assert!(repacked.ends_with(comment));

    let archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
    assert_eq!(archive.comment(), comment);

    let names: Vec<_> = entries(&output).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names.len(), 6);
    assert_eq!(names[0], "META-INF/");
    assert_eq!(names[5], "META-INF/maven/g/a/pom.properties");
}

#[tokio::test]
async fn non_zip_input_gets_an_archive_appended() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    std::fs::write(&input, b"this is not a zip file").unwrap();
    std::fs::write(&pom, POM).unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    let summary = repackager().run(&config).await.unwrap();
    assert_eq!(summary.total_entries, 2);

    assert!(std::fs::read(&output).unwrap().starts_with(b"this is not a zip file"));
    assert_eq!(entries(&output).len(), 2);
}

#[tokio::test]
async fn large_file_entries_are_kept() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    std::fs::write(&pom, POM).unwrap();

    // ZIP64 extra fields on every entry
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    let mut jar = ZipWriter::new_stream(File::create(&input).unwrap());
    jar.start_file("big/one.bin", options).unwrap();
    jar.write_all(&[7u8; 10_000]).unwrap();
    jar.start_file("big/two.bin", options).unwrap();
    jar.write_all(b"two").unwrap();
    jar.finish().unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    assert_eq!(repackager().run(&config).await.unwrap().total_entries, 4);

    let after = entries(&output);
    let names: Vec<_> = after.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        [
            "big/one.bin",
            "big/two.bin",
            "META-INF/maven/g/a/pom.xml",
            "META-INF/maven/g/a/pom.properties"
        ]
    );
    assert_eq!(after[0].1, vec![7u8; 10_000]);
    assert_eq!(after[1].1, b"two");
    assert_eq!(after[2].1, POM.as_bytes());
}

#[tokio::test]
async fn zip64_end_records_are_rewritten() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.jar");
    let output = dir.path().join("out.jar");
    let pom = dir.path().join("pom.xml");
    std::fs::write(&pom, POM).unwrap();

    // More entries than the classic end record can count
    let count = u16::MAX as usize + 50;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut jar = ZipWriter::new_stream(File::create(&input).unwrap());
    for i in 0..count {
        jar.start_file(format!("r/{i}"), options).unwrap();
    }
    jar.finish().unwrap();

    let config = RepackConfig::new(&output, &input, &pom).unwrap();
    let summary = repackager().run(&config).await.unwrap();
    assert_eq!(summary.total_entries, count as u64 + 2);

    let parser = ZipParser::new(Arc::new(LocalFileReader::new(&output).unwrap()));
    let cd = parser.locate_central_directory().await.unwrap().unwrap();
    assert!(cd.zip64);
    assert_eq!(cd.total_entries, count as u64 + 2);

    let mut archive = ZipArchive::new(File::open(&output).unwrap()).unwrap();
    assert_eq!(archive.len(), count + 2);
    assert_eq!(archive.by_index(0).unwrap().name(), "r/0");
    let mut properties = archive.by_index(count + 1).unwrap();
    assert_eq!(properties.name(), "META-INF/maven/g/a/pom.properties");
    let mut body = String::new();
    properties.read_to_string(&mut body).unwrap();
    assert!(body.ends_with("groupId=g\nartifactId=a"));
}
