//! Session start: clock/time overrides, time alignment policies and
//! configuration-driven sessions.

use sdr_core::{ClockSource, Direction, SdrError, SyncPolicy, TimeSource, TimeSpec};
use sdr_hardware::drivers::uhd::{TimeCommand, Usrp};
use sdr_hardware::{
    BackendRegistry, BoardBackend, BoardSettings, ChannelSettings, RadioBackend, Session,
    SessionConfig, StartSettings,
};
use serial_test::serial;
use std::io::Write;

const THREE_USRPS: &str = "uhd,serial=30A1F9B uhd,serial=30A1FA0 uhd,serial=F4A5C1";

fn open(args: &str) -> Session {
    Session::open(args, None, Direction::Source, &BackendRegistry::simulated().unwrap()).unwrap()
}

fn usrp(session: &Session, board: usize) -> &Usrp {
    match session.backend(board).unwrap() {
        BoardBackend::Uhd(usrp) => usrp,
        other => panic!("board {} is not a USRP: {:?}", board, other),
    }
}

#[test]
fn pc_clock_writes_one_stamp_to_every_board() {
    let session = open(THREE_USRPS);
    let before = TimeSpec::now();
    let report = session
        .start(&StartSettings {
            sync: SyncPolicy::PcClock,
            ..Default::default()
        })
        .unwrap();
    let stamp = report.stamp.expect("pc_clock reports its stamp");
    assert!(stamp >= before);
    assert!(report.skipped.is_empty());

    for board in 0..session.num_boards() {
        assert_eq!(
            usrp(&session, board).last_time_command(),
            Some((TimeCommand::Now, stamp))
        );
    }
}

#[test]
fn pc_clock_skips_boards_without_time_registers() {
    let session = open("uhd rtl=0 hackrf");
    let report = session
        .start(&StartSettings {
            sync: SyncPolicy::PcClock,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(report.skipped, vec![1, 2]);
    assert!(session.get_time_now(0).unwrap() >= report.stamp.unwrap());
    assert!(matches!(
        session.get_time_now(1),
        Err(SdrError::NotSupported { .. })
    ));
}

#[test]
fn sources_are_set_before_time_is_aligned() {
    let session = open(THREE_USRPS);
    let external = BoardSettings {
        clock_source: ClockSource::External,
        time_source: TimeSource::External,
    };
    let report = session
        .start(&StartSettings {
            sync: SyncPolicy::UnknownPps,
            boards: vec![external, external, external],
            ..Default::default()
        })
        .unwrap();
    for board in 0..3 {
        assert_eq!(report.boards[board].clock_source, ClockSource::External);
        assert_eq!(session.get_time_source(board).unwrap(), TimeSource::External);
        assert_eq!(
            usrp(&session, board).last_time_command(),
            Some((TimeCommand::UnknownPps, TimeSpec::ZERO))
        );
    }
}

#[test]
fn none_policy_leaves_device_time_alone() {
    let session = open("uhd");
    let report = session.start(&StartSettings::default()).unwrap();
    assert_eq!(report.policy, SyncPolicy::None);
    assert!(report.stamp.is_none());
    assert!(usrp(&session, 0).last_time_command().is_none());
}

#[test]
fn rate_change_after_start_reaches_every_board() {
    let session = open(THREE_USRPS);
    session
        .start(&StartSettings {
            sample_rate: Some(1e6),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(session.set_sample_rate(4e6).unwrap(), 4e6);
    // B210s divide 32 MHz, the N210 divides 100 MHz.
    assert_eq!(session.backend(0).unwrap().get_sample_rate().unwrap(), 4e6);
    assert_eq!(session.backend(1).unwrap().get_sample_rate().unwrap(), 4e6);
    assert_eq!(session.backend(2).unwrap().get_sample_rate().unwrap(), 4e6);
}

#[test]
fn channel_settings_apply_in_logical_order() {
    let session = open("uhd,serial=30A1F9B,nchan=2 rtl=0");
    let settings = StartSettings {
        channels: vec![
            ChannelSettings {
                center_freq: Some(915e6),
                antenna: Some("TX/RX".into()),
                ..Default::default()
            },
            ChannelSettings {
                center_freq: Some(2.4e9),
                ..Default::default()
            },
            ChannelSettings {
                center_freq: Some(433.92e6),
                gain: Some(20.0),
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    session.start(&settings).unwrap();
    let specs: Vec<_> = (0..3).map(|c| session.channel_spec(c).unwrap()).collect();
    assert_eq!((specs[0].board, specs[0].local), (0, 0));
    assert_eq!(specs[0].center_freq, 915e6);
    assert_eq!(specs[0].antenna.as_deref(), Some("TX/RX"));
    assert_eq!((specs[1].board, specs[1].local), (0, 1));
    assert_eq!(specs[1].center_freq, 2.4e9);
    assert_eq!(specs[1].antenna.as_deref(), Some("RX2"));
    assert_eq!(specs[2].board, 1);
    assert_eq!(specs[2].gains[0].current, 19.7);
}

#[test]
#[serial]
fn config_file_drives_the_whole_session() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
args = "nchan=2 uhd,serial=30A1F9B uhd,serial=F4A5C1"
sync = "pc_clock"
sample_rate = 2e6

[[boards]]
clock_source = "gpsdo"

[[channels]]
center_freq = 1575.42e6
gains = {{ PGA = 30.0 }}
"#
    )
    .unwrap();

    let config = SessionConfig::load_from(file.path()).unwrap();
    let registry = BackendRegistry::simulated().unwrap();
    let session = config.open(&registry).unwrap();
    let report = session.start(&config.start_settings()).unwrap();

    assert_eq!(session.nchan(), 2);
    assert_eq!(report.sample_rate, Some(2e6));
    assert_eq!(report.boards[0].clock_source, ClockSource::Gpsdo);
    assert_eq!(report.boards[1].clock_source, ClockSource::Internal);
    assert_eq!(session.get_center_freq(0).unwrap(), 1575.42e6);
    assert_eq!(session.get_gain("PGA", 0).unwrap(), 30.0);
}

#[test]
#[serial]
fn environment_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "args = \"rtl=0\"\nlog_level = \"info\"").unwrap();

    std::env::set_var("SDR_LOG_LEVEL", "debug");
    let config = SessionConfig::load_from(file.path());
    std::env::remove_var("SDR_LOG_LEVEL");

    let config = config.unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.args, "rtl=0");
}
