//! E2E tests for the converter (emulate → convert → read back)
//!
//! Recordings come from the emulator, which also knows the samples a
//! correct conversion must produce. Output files are read back with the
//! channel file reader and compared against those expectations.

use std::path::{Path, PathBuf};

use quartz_demux::channel::ChannelError;
use quartz_demux::common::ConvertError;
use quartz_demux::config::ConvertConfig;
use quartz_demux::decoder::{encode_sample, DecodeError, PacketHeader, SamplePrefix, MSG_TYPE_NA};
use quartz_demux::emulator::{Recording, RecordingBuilder, Waveform};
use quartz_demux::output::{
    channel_file_name, validate_channel_file, ChannelFile, OutputError, HEADER_SIZE,
};
use quartz_demux::{convert, convert_in_background, Converter};
use tempfile::TempDir;

/// Write `bytes` as `run.dat` in a fresh directory
fn write_input(bytes: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.dat");
    std::fs::write(&path, bytes).expect("write input");
    (dir, path)
}

/// A single NA packet with the given body samples
fn na_packet(seqno: u64, ts_ns: u64, mask: u32, samples: &[i32]) -> Vec<u8> {
    let mut prefix = SamplePrefix {
        channel_mask: mask,
        seqno,
        ..SamplePrefix::default()
    };
    prefix.set_timestamp_ns(ts_ns);
    let body: Vec<u8> = samples.iter().flat_map(|&v| encode_sample(v)).collect();

    let mut out = PacketHeader::new(MSG_TYPE_NA, (SamplePrefix::SIZE + body.len()) as u32)
        .to_bytes()
        .to_vec();
    out.extend_from_slice(&prefix.to_bytes());
    out.extend_from_slice(&body);
    out
}

fn read_channel(dir: &Path, channel: usize) -> ChannelFile {
    ChannelFile::open(dir.join(channel_file_name(channel))).expect("read channel file")
}

/// Every active channel file matches the recording and has a consistent header
fn assert_outputs_match(dir: &Path, rec: &Recording) {
    for &ch in &rec.active {
        let path = dir.join(channel_file_name(ch));
        let file = read_channel(dir, ch);
        assert!(file.header.is_finalized(), "CH{:02} not finalized", ch);
        assert_eq!(file.samples, rec.expected(ch), "CH{:02} samples differ", ch);

        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(file.header.payload_bytes, size - HEADER_SIZE as u64);
    }
    for ch in 0..32 {
        if !rec.active.contains(&ch) {
            assert!(!dir.join(channel_file_name(ch)).exists(), "CH{:02} should not exist", ch);
        }
    }
}

#[test]
fn test_no_gaps() {
    let rec = RecordingBuilder::new()
        .channel_mask(0b1000_1011)
        .packets(50)
        .waveform(Waveform::Noise {
            seed: 42,
            sigma: 3_000_000.0,
        })
        .build()
        .unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    let report = Converter::new(ConvertConfig::new(&out))
        .unwrap()
        .run(&[&input])
        .unwrap();

    assert!(report.diagnostics.is_empty());
    assert_eq!(report.packets, 50);
    assert_eq!(report.missing_packets, 0);
    assert_eq!(report.channels.len(), 4);
    assert!(report.channels.iter().all(|c| c.samples == 50 * 14));
    assert_outputs_match(&out, &rec);
}

#[test]
fn test_extreme_sample_values() {
    let samples = [8_388_607, -8_388_608, -1, 0, 1, -2];
    let (dir, input) = write_input(&na_packet(0, 0, 0b11, &samples));
    let out = dir.path().join("out");

    convert(&[&input], &out, false).unwrap();

    assert_eq!(read_channel(&out, 0).samples, vec![8_388_607, -1, 1]);
    assert_eq!(read_channel(&out, 1).samples, vec![-8_388_608, 0, -2]);
}

#[test]
fn test_scenario_single_missing_packet() {
    // seqnos 10 and 12, 4 time points per packet, 4 ms apart: estimated 1 kHz
    let rec = RecordingBuilder::new()
        .channel_mask(0b011)
        .samples_per_channel(4)
        .sample_rate_hz(2000.0)
        .first_seqno(10)
        .packets(3)
        .drop_seqno(11)
        .build()
        .unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    let diagnostics = convert(&[&input], &out, false).unwrap();

    assert_eq!(diagnostics, vec!["Missing 1 [11, 12) 0.004 s".to_string()]);
    for ch in [0, 1] {
        let file = read_channel(&out, ch);
        assert_eq!(file.samples.len(), 12);
        // hold repeats the last value of packet 10
        assert_eq!(file.samples[4..8], [file.samples[3]; 4]);
    }
    assert_outputs_match(&out, &rec);
}

#[test]
fn test_several_gaps() {
    let rec = RecordingBuilder::new()
        .channel_mask(0xF0)
        .packets(40)
        .drop_seqno(5)
        .drop_seqno(17)
        .drop_seqno(18)
        .drop_seqno(30)
        .build()
        .unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    let report = Converter::new(ConvertConfig::new(&out))
        .unwrap()
        .run(&[&input])
        .unwrap();

    assert_eq!(report.missing_packets, 4);
    assert_eq!(report.diagnostics.len(), 3);
    assert!(report.diagnostics[1].starts_with("Missing 2 [17, 19) "));
    assert_outputs_match(&out, &rec);
}

#[test]
fn test_leading_and_trailing_drops_are_invisible() {
    let rec = RecordingBuilder::new()
        .first_seqno(100)
        .packets(10)
        .drop_seqno(100)
        .drop_seqno(109)
        .build()
        .unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    let diagnostics = convert(&[&input], &out, false).unwrap();
    assert!(diagnostics.is_empty());
    assert_outputs_match(&out, &rec);
}

#[test]
fn test_mask_change_fails_even_when_tolerant() {
    let first = RecordingBuilder::new().channel_mask(0b11).packets(3).build().unwrap();
    let second = RecordingBuilder::new()
        .channel_mask(0b111)
        .first_seqno(3)
        .packets(3)
        .build()
        .unwrap();
    let mut bytes = first.bytes();
    bytes.extend(second.bytes());
    let (dir, input) = write_input(&bytes);

    for tolerate in [false, true] {
        let out = dir.path().join(format!("out-{}", tolerate));
        let result = convert(&[&input], &out, tolerate);
        assert!(
            matches!(
                result,
                Err(ConvertError::ChannelMaskChanged {
                    expected: 0b11,
                    actual: 0b111,
                    seqno: 3
                })
            ),
            "tolerate={}: {:?}",
            tolerate,
            result
        );
    }
}

#[test]
fn test_repeated_or_decreasing_seqno_fails() {
    for restart in [2u64, 1, 0] {
        let mut bytes = RecordingBuilder::new().packets(3).build().unwrap().bytes();
        bytes.extend(
            RecordingBuilder::new()
                .first_seqno(restart)
                .packets(1)
                .build()
                .unwrap()
                .bytes(),
        );
        let (dir, input) = write_input(&bytes);

        let result = convert(&[&input], dir.path().join("out"), true);
        assert!(matches!(
            result,
            Err(ConvertError::SequenceNotIncreasing { previous: 2, current }) if current == restart
        ));
    }
}

/// Packets 0..3, then 5.. ten seconds later: 2 packets missing at ~2.8 Hz
fn implausible_gap() -> Vec<u8> {
    let builder = RecordingBuilder::new().channel_mask(0b1).start_ns(1_000_000_000);
    let mut bytes = builder.clone().packets(3).build().unwrap().bytes();
    bytes.extend(
        builder
            .first_seqno(5)
            .start_ns(11_000_000_000)
            .packets(2)
            .build()
            .unwrap()
            .bytes(),
    );
    bytes
}

#[test]
fn test_implausible_rate_fails_without_tolerance() {
    let (dir, input) = write_input(&implausible_gap());
    let out = dir.path().join("out");

    let result = convert(&[&input], &out, false);
    assert!(matches!(
        result,
        Err(ConvertError::ImplausibleRate { missing: 2, .. })
    ));

    let validation = validate_channel_file(out.join("CH00.j")).unwrap();
    assert!(!validation.finalized);
    assert!(!validation.is_valid());
}

#[test]
fn test_implausible_rate_tolerated() {
    let (dir, input) = write_input(&implausible_gap());
    let out = dir.path().join("out");

    let diagnostics = convert(&[&input], &out, true).unwrap();

    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics[0].starts_with("Missing 2 [3, 5) "));
    let file = read_channel(&out, 0);
    // 3 real packets, 2 held, 2 real
    assert_eq!(file.samples.len(), 7 * 14);
    assert!(file.samples[42..70].iter().all(|&v| v == file.samples[41]));
}

#[test]
fn test_unknown_messages_are_skipped() {
    let rec = RecordingBuilder::new()
        .packets(12)
        .ignored_every(1)
        .drop_seqno(6)
        .build()
        .unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    let report = Converter::new(ConvertConfig::new(&out))
        .unwrap()
        .run(&[&input])
        .unwrap();

    assert_eq!(report.skipped_messages, 11);
    assert_eq!(report.packets, 11);
    assert_eq!(report.diagnostics.len(), 1);
    assert_outputs_match(&out, &rec);
}

#[test]
fn test_extended_packets() {
    let rec = RecordingBuilder::new()
        .channel_mask(0x8000_0001)
        .extended(true)
        .packets(8)
        .drop_seqno(3)
        .build()
        .unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    convert(&[&input], &out, false).unwrap();
    assert!(out.join("CH31.j").exists());
    assert_outputs_match(&out, &rec);
}

#[test]
fn test_multiple_input_files_form_one_stream() {
    let rec = RecordingBuilder::new()
        .channel_mask(0b101)
        .packets(30)
        .drop_seqno(10)
        .waveform(Waveform::Noise {
            seed: 7,
            sigma: 500.0,
        })
        .build()
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let inputs = rec.write_parts(dir.path(), "run", 4).unwrap();
    let out = dir.path().join("out");

    let report = Converter::new(ConvertConfig::new(&out))
        .unwrap()
        .run(&inputs)
        .unwrap();

    assert_eq!(report.input_files, 4);
    assert_eq!(report.missing_packets, 1);
    assert_outputs_match(&out, &rec);
}

#[test]
fn test_gap_between_input_files_is_filled() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("run_000.dat");
    let second = dir.path().join("run_001.dat");
    let t0 = 1_000_000_000;
    // last packet of one file and first of the next are not consecutive
    std::fs::write(&first, na_packet(10, t0, 0b11, &[1, -1, 2, -2, 3, -3, 4, -4])).unwrap();
    std::fs::write(
        &second,
        na_packet(12, t0 + 4_123_457, 0b11, &[5, -5, 6, -6, 7, -7, 8, -8]),
    )
    .unwrap();
    let out = dir.path().join("out");

    let report = Converter::new(ConvertConfig::new(&out))
        .unwrap()
        .run(&[&first, &second])
        .unwrap();

    assert_eq!(report.input_files, 2);
    assert_eq!(report.missing_packets, 1);
    assert_eq!(
        report.diagnostics,
        vec!["Missing 1 [11, 12) 0.00412346 s".to_string()]
    );
    assert_eq!(
        read_channel(&out, 0).samples,
        vec![1, 2, 3, 4, 4, 4, 4, 4, 5, 6, 7, 8]
    );
    assert_eq!(
        read_channel(&out, 1).samples,
        vec![-1, -2, -3, -4, -4, -4, -4, -4, -5, -6, -7, -8]
    );
}

#[test]
fn test_truncated_body_leaves_placeholders() {
    let mut bytes = RecordingBuilder::new().channel_mask(0b11).packets(2).build().unwrap().bytes();
    // three samples for two channels
    bytes.extend(na_packet(2, 0, 0b11, &[1, 2, 3]));
    let (dir, input) = write_input(&bytes);
    let out = dir.path().join("out");

    let result = convert(&[&input], &out, false);
    assert!(matches!(
        result,
        Err(ConvertError::TruncatedBody {
            seqno: 2,
            samples: 3,
            channels: 2
        })
    ));

    for ch in [0, 1] {
        let file = read_channel(&out, ch);
        assert!(file.header.is_placeholder());
        // samples of the first two packets were flushed
        assert_eq!(file.samples.len(), 28);
    }
}

#[test]
fn test_truncated_message_fails() {
    let mut bytes = RecordingBuilder::new().packets(3).build().unwrap().bytes();
    bytes.truncate(bytes.len() - 5);
    let (dir, input) = write_input(&bytes);

    let result = convert(&[&input], dir.path().join("out"), false);
    match result {
        Err(ConvertError::Decode { path, source }) => {
            assert_eq!(path, input);
            assert!(matches!(source, DecodeError::Truncated { .. }));
        }
        other => panic!("expected decode error, got {:?}", other),
    }
}

#[test]
fn test_bad_marker_fails() {
    let mut bytes = RecordingBuilder::new().packets(2).build().unwrap().bytes();
    let second = bytes.len() / 2;
    bytes[second] = b'X';
    let (dir, input) = write_input(&bytes);

    let result = convert(&[&input], dir.path().join("out"), true);
    assert!(matches!(
        result,
        Err(ConvertError::Decode {
            source: DecodeError::CorruptHeader { .. },
            ..
        })
    ));
}

#[test]
fn test_empty_mask_fails() {
    let (dir, input) = write_input(&na_packet(0, 0, 0, &[]));
    let result = convert(&[&input], dir.path().join("out"), true);
    assert!(matches!(result, Err(ConvertError::EmptyChannelMask { seqno: 0 })));
}

#[test]
fn test_empty_input_produces_no_files() {
    let (dir, input) = write_input(&[]);
    let out = dir.path().join("out");

    let report = Converter::new(ConvertConfig::new(&out))
        .unwrap()
        .run(&[&input])
        .unwrap();
    assert!(report.channels.is_empty());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_existing_output_is_never_overwritten() {
    let rec = RecordingBuilder::new().packets(2).build().unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    convert(&[&input], &out, false).unwrap();
    let before = std::fs::read(out.join("CH00.j")).unwrap();

    let result = convert(&[&input], &out, false);
    assert!(matches!(
        result,
        Err(ConvertError::Output(OutputError::Channel(
            ChannelError::AlreadyExists(_)
        )))
    ));
    assert_eq!(std::fs::read(out.join("CH00.j")).unwrap(), before);
}

#[test]
fn test_small_buffers() {
    let rec = RecordingBuilder::new().channel_mask(0b111).packets(20).build().unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    // input buffer just holds one message; output buffer smaller than one packet
    let config = ConvertConfig::new(&out).with_buffer_sizes(rec.messages[0].len(), 16);
    Converter::new(config).unwrap().run(&[&input]).unwrap();
    assert_outputs_match(&out, &rec);
}

#[tokio::test]
async fn test_background_conversion() {
    let rec = RecordingBuilder::new().packets(25).drop_seqno(12).build().unwrap();
    let (dir, input) = write_input(&rec.bytes());
    let out = dir.path().join("out");

    let report = convert_in_background(ConvertConfig::new(&out), vec![input])
        .await
        .unwrap();

    assert_eq!(report.packets, 24);
    assert_eq!(report.missing_packets, 1);
    assert_outputs_match(&out, &rec);
}

#[tokio::test]
async fn test_background_conversion_reports_errors() {
    let dir = tempfile::tempdir().unwrap();
    let result =
        convert_in_background(ConvertConfig::new(dir.path()), vec![dir.path().join("none")]).await;
    assert!(matches!(result, Err(ConvertError::Channel(ChannelError::Open { .. }))));
}
