//! Integration tests for dmarcsift.
//!
//! Fixtures are built on the fly in temporary directories (zip, tar.gz, gzip
//! and MIME containers around real-looking reports). The library is driven
//! directly for pipeline properties and the compiled binary for the CLI
//! surface.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str;

use dmarcsift::cli::Stage;
use dmarcsift::config::{Config, ExtractConfig, OutputLayout};
use dmarcsift::events::{Outcome, SkipReason};
use dmarcsift::extract::{ExtractContext, Extractor};
use dmarcsift::{Pipeline, ReportKind, classify};
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const R1_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feedback>
  <report_metadata>
    <org_name>google.com</org_name>
    <email>noreply-dmarc-support@google.com</email>
    <report_id>R1</report_id>
    <date_range><begin>1700000000</begin><end>1700086399</end></date_range>
  </report_metadata>
  <policy_published>
    <domain>example.com</domain>
    <p>none</p>
  </policy_published>
  <record>
    <row>
      <source_ip>10.0.0.1</source_ip>
      <count>5</count>
      <policy_evaluated><disposition>none</disposition><dkim>fail</dkim><spf>pass</spf></policy_evaluated>
    </row>
    <identifiers><header_from>example.com</header_from></identifiers>
    <auth_results>
      <dkim><domain>example.com</domain><result>fail</result></dkim>
      <spf><domain>example.com</domain><result>pass</result></spf>
    </auth_results>
  </record>
</feedback>
"#;

const RUF_XML: &str = r#"<?xml version="1.0"?>
<feedback>
  <report_id>F-1</report_id>
  <feedback_type>auth-failure</feedback_type>
  <source_ip>203.0.113.5</source_ip>
  <auth_failure>SPF permerror; DKIM fail</auth_failure>
  <reported_domain>example.com</reported_domain>
</feedback>
"#;

const KEYWORD_FREE_HTML: &str = "<html><body><p>Quarterly newsletter</p></body></html>";

/// Helper to get the path to the compiled binary
fn get_binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    if path.ends_with("deps") {
        path.pop(); // Remove "deps" directory
    }
    path.push("dmarcsift");
    path
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    gzip_bytes(&builder.into_inner().unwrap())
}

/// `R1_XML` zipped as `google.com!example.com!1700000000!1700086399.xml`,
/// base64-encoded for a MIME body.
const R1_ZIP_BASE64: &str = "UEsDBBQAAAAIAAAAb1dgblQvcgEAAE4DAAAwAAAAZ29vZ2xlLmNvbSFleGFtcGxlLmNvbSExNzAw\r\n\
MDAwMDAwITE3MDAwODYzOTkueG1sjVPLTsMwELz3K6LcWzdCQJG2Lic+AME5cuNNajV+yE5K+/ds\r\n\
ZOcBqhDJZXe8OzuzTuBw1W12QR+UNfu82GzzDE1lpTLNPv/8eFvv8gNfQY0oj6I681WWgUdnfVdq\r\n\
7IQUnRgwQq1vSiM08sbapsVNZTWwCYw1qIVqubHE0N7WUgtfrUPvBrrXZVusiz1pmpL8vQA2Z/GU\r\n\
BGDphWmQwxEbZXjxvE0PsIgAGhnh3dPDywvRUw5s0Tq4YndsgbOtqm6l64+tCiecploSaDhehXaj\r\n\
5oTFAkcmDQJzkfoeDRmrrB8Zvf2KEcXB9r7CUjlebDfDS75nbKyqbG86/ggsBiOcRuFFtD0ZJKNS\r\n\
BWeD6uiGk6olAvKsNK9p34QPIQRXcydCoKEUTeJnxqiYTZJBSTSdqhV9RhxOKCT6svZW/1zQ8gDY\r\n\
sieyiL47lR5D33ZhshMl/bFviB3JQUqSlWmhg49/cETXE8fQlrz+1jZUxdsDNv8b31BLAQIUAxQA\r\n\
AAAIAAAAb1dgblQvcgEAAE4DAAAwAAAAAAAAAAAAAACAAQAAAABnb29nbGUuY29tIWV4YW1wbGUu\r\n\
Y29tITE3MDAwMDAwMDAhMTcwMDA4NjM5OS54bWxQSwUGAAAAAAEAAQBeAAAAwAEAAAAA";

fn eml_with_attachment(name: &str, content_type: &str, base64_body: &str) -> String {
    format!(
        "From: noreply-dmarc-support@google.com\r\n\
To: dmarc@example.com\r\n\
Subject: Report domain: example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"BOUNDARY\"\r\n\
\r\n\
--BOUNDARY\r\n\
Content-Type: text/plain\r\n\
\r\n\
This is an aggregate report.\r\n\
--BOUNDARY\r\n\
Content-Type: {content_type}; name=\"{name}\"\r\n\
Content-Disposition: attachment; filename=\"{name}\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
{base64_body}\r\n\
--BOUNDARY--\r\n"
    )
}

/// `inner` forwarded as an unnamed `message/rfc822` part.
fn forwarded(inner: &str) -> String {
    format!(
        "From: postmaster@example.com\r\n\
To: dmarc@example.com\r\n\
Subject: Fwd: Report domain: example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"FWD\"\r\n\
\r\n\
--FWD\r\n\
Content-Type: text/plain\r\n\
\r\n\
See below.\r\n\
--FWD\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
{inner}\r\n\
--FWD--\r\n"
    )
}

fn seven_row_table() -> String {
    let mut rows = String::new();
    for i in 1..=7 {
        rows.push_str(&format!(
            "<tr><td>192.0.2.{i}</td><td>{i}</td><td>pass</td><td>fail</td></tr>"
        ));
    }
    format!(
        "<html><body><table><tr><th>IP</th><th>Messages</th><th>DKIM</th><th>SPF</th></tr>{rows}</table></body></html>"
    )
}

fn pipeline_for(out: &Path) -> Pipeline {
    let mut config = Config::default();
    config.layout = OutputLayout::under(out);
    Pipeline::new(config)
}

#[test]
fn test_nested_document_extracted_byte_identical() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();

    // outer.zip -> bundle.tar.gz -> report.xml.gz -> report.xml
    let gz = gzip_bytes(R1_XML.as_bytes());
    let tgz = tar_gz_bytes(&[("report.xml.gz", &gz)]);
    write_zip(&input.join("outer.zip"), &[("bundle.tar.gz", &tgz)]);

    let out = tmp.path().join("extracted");
    let report = Extractor::new(ExtractConfig::default(), &out)
        .extract(&input)
        .unwrap();

    assert_eq!(report.documents.len(), 1);
    let doc = &report.documents[0];
    assert_eq!(fs::read(&doc.path).unwrap(), R1_XML.as_bytes());
    assert_eq!(doc.origin, vec!["outer.zip", "bundle.tar.gz", "report.xml.gz"]);
    assert_eq!(doc.trace(), "outer.zip!bundle.tar.gz!report.xml.gz!report.xml");
    assert_eq!(report.stats.containers_unpacked, 3);
    assert!(report.events.is_empty());
}

#[test]
fn test_eml_attachments_are_unpacked() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();

    fs::write(
        input.join("message.eml"),
        eml_with_attachment("report.zip", "application/zip", R1_ZIP_BASE64),
    )
    .unwrap();

    let out = tmp.path().join("reports");
    let report = pipeline_for(&out).run(Stage::All, &input).unwrap();

    assert_eq!(report.documents.len(), 1);
    assert_eq!(
        fs::read(&report.documents[0].path).unwrap(),
        R1_XML.as_bytes()
    );
    assert_eq!(report.aggregate.records.len(), 1);
    assert_eq!(report.aggregate.records[0].report_id, "R1");
}

#[test]
fn test_forwarded_report_is_unpacked() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    let inner = eml_with_attachment("report.zip", "application/zip", R1_ZIP_BASE64);
    fs::write(input.join("fwd.eml"), forwarded(&inner)).unwrap();

    let report = pipeline_for(&tmp.path().join("reports"))
        .run(Stage::All, &input)
        .unwrap();

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].origin, vec!["fwd.eml", "report.zip"]);
    assert_eq!(report.aggregate.records.len(), 1);
    assert_eq!(report.aggregate.records[0].report_id, "R1");
}

#[test]
fn test_duplicate_processing_yields_document_once() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("r.xml"), R1_XML).unwrap();

    let extractor = Extractor::new(ExtractConfig::default(), tmp.path().join("out"));
    let mut ctx = ExtractContext::new();
    extractor.extract_with(&input, &mut ctx).unwrap();
    extractor.extract_with(&input, &mut ctx).unwrap();
    let report = ctx.into_report();

    assert_eq!(report.documents.len(), 1);
}

#[test]
fn test_same_name_documents_do_not_overwrite() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    write_zip(&input.join("a.zip"), &[("report.xml", b"<feedback>first</feedback>")]);
    write_zip(&input.join("b.zip"), &[("report.xml", b"<feedback>second</feedback>")]);

    let out = tmp.path().join("extracted");
    let report = Extractor::new(ExtractConfig::default(), &out)
        .extract(&input)
        .unwrap();

    assert_eq!(report.documents.len(), 2);
    assert_eq!(
        fs::read_to_string(out.join("report.xml")).unwrap(),
        "<feedback>first</feedback>"
    );
    assert_eq!(
        fs::read_to_string(out.join("report_1.xml")).unwrap(),
        "<feedback>second</feedback>"
    );
}

#[test]
fn test_corrupt_container_does_not_stop_siblings() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a_broken.zip"), b"PK\x03\x04 definitely not a zip").unwrap();
    fs::write(input.join("b_report.xml"), R1_XML).unwrap();

    let report = Extractor::new(ExtractConfig::default(), tmp.path().join("out"))
        .extract(&input)
        .unwrap();

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.events.len(), 1);
    assert!(report.events[0].is_failure());
}

#[test]
fn test_depth_limit_is_an_event() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    let tgz = tar_gz_bytes(&[("deep.xml", R1_XML.as_bytes())]);
    write_zip(&input.join("outer.zip"), &[("inner.tar.gz", &tgz)]);

    let config = ExtractConfig {
        max_depth: 1,
        ..ExtractConfig::default()
    };
    let report = Extractor::new(config, tmp.path().join("out"))
        .extract(&input)
        .unwrap();

    assert!(report.documents.is_empty());
    assert!(report.events.iter().any(|e| matches!(
        e.outcome,
        Outcome::Skipped {
            reason: SkipReason::DepthLimit { depth: 2 }
        }
    )));
}

#[test]
fn test_classification_scenarios() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("report_42.html"), KEYWORD_FREE_HTML).unwrap();
    fs::write(input.join("table.html"), seven_row_table()).unwrap();
    fs::write(input.join("r1.xml"), R1_XML).unwrap();
    fs::write(input.join("f1.xml"), RUF_XML).unwrap();

    let out = tmp.path().join("reports");
    let report = pipeline_for(&out).run(Stage::All, &input).unwrap();

    let kind_of = |name: &str| {
        report
            .classified
            .iter()
            .find(|c| c.source.file_name().is_some_and(|n| n == name))
            .map(|c| c.verdict.kind)
            .unwrap()
    };
    assert_eq!(kind_of("report_42.html"), ReportKind::Unclassified);
    assert_eq!(kind_of("table.html"), ReportKind::Aggregate);
    assert_eq!(kind_of("r1.xml"), ReportKind::Aggregate);
    assert_eq!(kind_of("f1.xml"), ReportKind::Forensic);

    assert!(out.join("unclassified/report_42.html").exists());
    assert!(out.join("aggregate-reports/table.html").exists());

    // classification is a pure function of the document
    for doc in &report.documents {
        assert_eq!(classify(doc), classify(doc));
    }
}

#[test]
fn test_aggregate_and_forensic_scenarios() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("r1.xml"), R1_XML).unwrap();
    fs::write(input.join("f1.xml"), RUF_XML).unwrap();
    fs::write(input.join("table.html"), seven_row_table()).unwrap();

    let report = pipeline_for(&tmp.path().join("reports"))
        .run(Stage::All, &input)
        .unwrap();

    let r1: Vec<_> = report
        .aggregate
        .records
        .iter()
        .filter(|r| r.report_id == "R1")
        .collect();
    assert_eq!(r1.len(), 1);
    assert_eq!(r1[0].source_ip, "10.0.0.1");
    assert_eq!(r1[0].count, 5);
    assert_eq!(r1[0].date_begin, "2023-11-14 22:13:20");
    assert!(r1[0].spf_pass);
    assert!(!r1[0].dkim_pass);
    assert!(report.aggregate.failed.iter().any(|r| r.report_id == "R1"));

    // seven table rows, all failing SPF
    let table_rows = report
        .aggregate
        .records
        .iter()
        .filter(|r| r.source_ip.starts_with("192.0.2."))
        .count();
    assert_eq!(table_rows, 7);

    assert_eq!(report.forensic.len(), 1);
    let ruf = &report.forensic[0];
    assert!(ruf.spf_failed);
    assert!(ruf.dkim_failed);
    assert_eq!(ruf.auth_failure, "SPF, DKIM");
    assert_eq!(ruf.user_agent, "Unknown");
}

#[test]
fn test_binary_json_output() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    let gz = gzip_bytes(R1_XML.as_bytes());
    write_zip(&input.join("google.zip"), &[("report.xml.gz", &gz)]);
    fs::write(input.join("f1.xml"), RUF_XML).unwrap();

    let out = tmp.path().join("reports");
    let output = Command::new(get_binary_path())
        .arg(&input)
        .arg("--output-dir")
        .arg(&out)
        .arg("--format=json")
        .arg("--verbose=0")
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = str::from_utf8(&output.stdout).unwrap();
    let json: serde_json::Value = serde_json::from_str(stdout).expect("valid JSON");
    assert_eq!(json["metadata"]["tool_name"], "dmarcsift");
    assert_eq!(json["aggregate_records"][0]["Report_ID"], "R1");
    assert_eq!(json["aggregate_records"][0]["DKIM_Pass"], false);
    assert_eq!(json["forensic_records"][0]["Auth_Failure"], "SPF, DKIM");
    assert_eq!(json["statistics"]["extract"]["containers_unpacked"], 2);
    assert!(out.join("aggregate-reports/report.xml").exists());
}

#[test]
fn test_binary_yaml_output() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("r1.xml"), R1_XML).unwrap();

    let output = Command::new(get_binary_path())
        .arg("--input")
        .arg(&input)
        .arg("-o")
        .arg(tmp.path().join("reports"))
        .arg("--format=yaml")
        .arg("--verbose=0")
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = str::from_utf8(&output.stdout).unwrap();
    assert!(stdout.contains("tool_name: dmarcsift"));
    assert!(stdout.contains("Report_ID: R1"));
}

#[test]
fn test_binary_text_output() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("r1.xml"), R1_XML).unwrap();
    fs::write(input.join("notes.bin"), [0u8, 159, 146, 150]).unwrap();

    let output = Command::new(get_binary_path())
        .arg(&input)
        .arg("-o")
        .arg(tmp.path().join("reports"))
        .arg("--no-color")
        .arg("--show-events")
        .arg("--verbose=0")
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = str::from_utf8(&output.stdout).unwrap();
    assert!(stdout.contains("Aggregate records"));
    assert!(stdout.contains("10.0.0.1"));
    assert!(stdout.contains("notes.bin"));
    assert!(!stdout.contains("\x1b["));
}

#[test]
fn test_binary_stages_chain() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("inbox");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("r1.xml"), R1_XML).unwrap();
    fs::write(input.join("f1.xml"), RUF_XML).unwrap();
    let out = tmp.path().join("reports");

    let run = |stage: &str, dir: &Path| {
        Command::new(get_binary_path())
            .arg(dir)
            .arg("-o")
            .arg(&out)
            .arg("--stage")
            .arg(stage)
            .arg("--format=json")
            .arg("--verbose=0")
            .output()
            .expect("Failed to execute binary")
    };

    assert!(run("extract", &input).status.success());
    assert!(out.join("extracted/r1.xml").exists());
    assert!(!out.join("aggregate-reports").exists());

    assert!(run("classify", &out.join("extracted")).status.success());
    assert!(out.join("aggregate-reports/r1.xml").exists());
    assert!(out.join("forensic-reports/f1.xml").exists());

    let aggregate = run("aggregate", &out.join("aggregate-reports"));
    let json: serde_json::Value = serde_json::from_slice(&aggregate.stdout).unwrap();
    assert_eq!(json["input"]["stage"], "aggregate");
    assert_eq!(json["aggregate_records"].as_array().unwrap().len(), 1);
    assert!(json["forensic_records"].as_array().unwrap().is_empty());

    let forensic = run("forensic", &out.join("forensic-reports"));
    let json: serde_json::Value = serde_json::from_slice(&forensic.stdout).unwrap();
    assert_eq!(json["forensic_records"][0]["Report_ID"], "F-1");
}

#[test]
fn test_missing_input_exits_with_error() {
    let tmp = TempDir::new().unwrap();
    let output = Command::new(get_binary_path())
        .arg(tmp.path().join("does-not-exist"))
        .arg("-o")
        .arg(tmp.path().join("reports"))
        .arg("--verbose=1")
        .output()
        .expect("Failed to execute binary");

    assert_eq!(output.status.code(), Some(1));
    let stderr = str::from_utf8(&output.stderr).unwrap();
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn test_invalid_config_exits_with_error() {
    let tmp = TempDir::new().unwrap();
    let output = Command::new(get_binary_path())
        .arg(tmp.path())
        .arg("--max-depth=0")
        .arg("--verbose=0")
        .output()
        .expect("Failed to execute binary");

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_schema_generation() {
    let output = Command::new(get_binary_path())
        .arg("--generate-schema")
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = str::from_utf8(&output.stdout).unwrap();
    let schema: serde_json::Value = serde_json::from_str(stdout).expect("schema is JSON");
    assert_eq!(schema["title"], "SiftOutput");
    assert!(stdout.contains("Source_IP"));
}

#[test]
fn test_help_output() {
    let output = Command::new(get_binary_path())
        .arg("--help")
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = str::from_utf8(&output.stdout).unwrap();
    assert!(stdout.contains("--stage"));
    assert!(stdout.contains("--output-dir"));
    assert!(stdout.contains("--generate-schema"));
}
