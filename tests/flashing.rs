use rand::Rng;

use tinyisp::format::{encode_image, parse_ihex, EOF_RECORD};
use tinyisp::progress::{CancelToken, Cancellable, Phase, ProgressEvent, Silent};
use tinyisp::transport::SimTarget;
use tinyisp::{Chip, ErrorKind, Flashing, IspError, MemoryImage, Timing};

fn chip() -> Chip {
    Chip::attiny13().unwrap()
}

fn flashing(sim: SimTarget) -> Flashing<SimTarget> {
    Flashing::new(sim, chip(), Timing::default())
}

fn kind(err: &anyhow::Error) -> ErrorKind {
    IspError::of(err).expect("typed failure").kind()
}

fn random_image(base: u32, len: usize) -> MemoryImage {
    let mut rng = rand::rng();
    let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    MemoryImage::from_bytes(base, &data).unwrap()
}

#[test]
fn program_then_verify() {
    let image = random_image(0, 300);
    let mut f = flashing(SimTarget::new(&chip()));
    let mut events: Vec<ProgressEvent> = Vec::new();
    f.program_image(&image, &mut |e: ProgressEvent| events.push(e))
        .unwrap();
    f.verify_image(&image, &mut Silent).unwrap();

    let sim = f.into_inner();
    assert!(!sim.reset_asserted());
    assert_eq!(&sim.flash()[..300], &image.padded(0, 300)[..]);
    assert!(sim.flash()[300..].iter().all(|&b| b == 0xff));
    assert_eq!(sim.fuses().0, 0x7a);
    assert_eq!(sim.erases(), 1);
    // 300 bytes span 10 pages
    assert_eq!(sim.page_writes(), 10);

    let programming: Vec<u8> = events
        .iter()
        .filter(|e| e.phase == Phase::Programming)
        .map(|e| e.percent)
        .collect();
    assert_eq!(programming.len(), 10);
    assert_eq!(programming.last(), Some(&100));
    assert_eq!(events.last().map(|e| (e.phase, e.percent)), Some((Phase::Verifying, 100)));
}

#[test]
fn programming_twice_is_idempotent() {
    let image = parse_ihex(":0600000001020304050AE1\n:00000001FF\n").unwrap();
    let mut f = flashing(SimTarget::new(&chip()));
    f.program_image(&image, &mut Silent).unwrap();
    let first = f.transport().flash().to_vec();
    f.program_image(&image, &mut Silent).unwrap();

    let sim = f.into_inner();
    assert_eq!(sim.flash(), &first[..]);
    // the clock fuse is only written the first time
    assert_eq!(sim.fuse_writes(), 1);
}

#[test]
fn wrong_signature_never_erases() {
    let sim = SimTarget::new(&chip())
        .with_signature([0x1e, 0x93, 0x0b])
        .with_flash(0, &[0x12, 0x34]);
    let mut f = flashing(sim);
    let err = f
        .program_image(&MemoryImage::from_bytes(0, &[0xaa]).unwrap(), &mut Silent)
        .unwrap_err();
    assert_eq!(kind(&err), ErrorKind::Protocol);

    let sim = f.into_inner();
    assert_eq!(sim.erases(), 0);
    assert_eq!(sim.fuse_writes(), 0);
    assert_eq!(&sim.flash()[..2], &[0x12, 0x34]);
    assert!(!sim.reset_asserted());
}

#[test]
fn absent_target_fails_handshake() {
    let mut f = flashing(SimTarget::absent(&chip()));
    let err = f
        .program_image(&MemoryImage::from_bytes(0, &[0xaa]).unwrap(), &mut Silent)
        .unwrap_err();
    assert!(matches!(IspError::of(&err), Some(IspError::Handshake { echo: 0xff })));
    assert!(f.dump_image(&mut Silent).unwrap().is_none());
    assert!(!f.transport().reset_asserted());
}

#[test]
fn unsafe_high_fuse_aborts_before_erase() {
    let sim = SimTarget::new(&chip())
        .with_fuses(0x6a, 0xfe)
        .with_flash(0, &[0x12]);
    let mut f = flashing(sim);
    let err = f
        .program_image(&MemoryImage::from_bytes(0, &[0xaa]).unwrap(), &mut Silent)
        .unwrap_err();
    assert_eq!(kind(&err), ErrorKind::Safety);

    let sim = f.into_inner();
    assert_eq!(sim.fuse_writes(), 0);
    assert_eq!(sim.erases(), 0);
    assert_eq!(sim.flash()[0], 0x12);
    assert!(!sim.reset_asserted());
}

#[test]
fn verification_failure_releases_reset() {
    let sim = SimTarget::new(&chip()).with_stuck_byte(0x21, 0xff);
    let mut f = flashing(sim);
    let image = MemoryImage::from_bytes(0x20, &[0x00; 4]).unwrap();
    let err = f.program_image(&image, &mut Silent).unwrap_err();
    match IspError::of(&err) {
        Some(IspError::FlashMismatch {
            mismatches,
            stopped_early: false,
        }) => {
            assert_eq!(mismatches.len(), 1);
            assert_eq!(mismatches[0].address, 0x21);
            assert_eq!(mismatches[0].expected, 0x00);
            assert_eq!(mismatches[0].actual, 0xff);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(kind(&err), ErrorKind::Verification);
    assert!(!f.transport().reset_asserted());
}

#[test]
fn out_of_range_image_is_rejected_up_front() {
    let mut f = flashing(SimTarget::new(&chip()));
    let err = f
        .program_image(&MemoryImage::from_bytes(0x400, &[0x00]).unwrap(), &mut Silent)
        .unwrap_err();
    assert!(matches!(
        IspError::of(&err),
        Some(IspError::AddressOutOfRange {
            address: 0x400,
            flash_size: 1024
        })
    ));
    let err = f.program_image(&MemoryImage::new(), &mut Silent).unwrap_err();
    assert_eq!(kind(&err), ErrorKind::Image);
    assert_eq!(f.transport().frames(), 0);
}

#[test]
fn verify_rejects_image_past_flash_end() {
    let mut f = flashing(SimTarget::new(&chip()).with_flash(0, &[0xaa]));
    let image: MemoryImage = [(0x2_0000, 0xaa)].into_iter().collect();
    let err = f.verify_image(&image, &mut Silent).unwrap_err();
    assert!(matches!(
        IspError::of(&err),
        Some(IspError::AddressOutOfRange {
            address: 0x2_0000,
            flash_size: 1024
        })
    ));
    assert_eq!(f.transport().frames(), 0);

    f.verify_image(&MemoryImage::new(), &mut Silent).unwrap();
}

#[test]
fn cancellation_stops_between_pages() {
    let image = random_image(0, 256);
    let token = CancelToken::new();
    let mut f = flashing(SimTarget::new(&chip()));
    let mut pages = 0;
    let trigger = token.clone();
    let mut observer = Cancellable::new(
        |e: ProgressEvent| {
            if e.phase == Phase::Programming {
                pages += 1;
                if pages == 3 {
                    trigger.cancel();
                }
            }
        },
        token,
    );
    let err = f.program_image(&image, &mut observer).unwrap_err();
    drop(observer);
    assert_eq!(kind(&err), ErrorKind::Cancelled);
    assert_eq!(pages, 3);

    let sim = f.into_inner();
    assert_eq!(sim.page_writes(), 3);
    assert!(!sim.reset_asserted());
}

#[test]
fn dump_is_shortened_to_last_programmed_byte() {
    let sim = SimTarget::new(&chip()).with_flash(0, &[0x0e, 0xc0, 0x1d, 0xc0, 0x1c, 0xc0]);
    let mut f = flashing(sim);
    let mut reading = 0;
    let text = f
        .dump_image(&mut |e: ProgressEvent| {
            assert_eq!(e.phase, Phase::Reading);
            reading += 1;
        })
        .unwrap()
        .unwrap();
    assert_eq!(text, ":060000000EC01DC01CC073\n:00000001FF\n");
    assert_eq!(reading, 64);
    assert!(!f.transport().reset_asserted());
}

#[test]
fn blank_device_dumps_only_eof() {
    let mut f = flashing(SimTarget::new(&chip()));
    let text = f.dump_image(&mut Silent).unwrap().unwrap();
    assert_eq!(text.trim_end(), EOF_RECORD);
}

#[test]
fn dump_of_programmed_image_parses_back() {
    let image = random_image(0x100, 100);
    let mut f = flashing(SimTarget::new(&chip()));
    f.program_image(&image, &mut Silent).unwrap();
    let dumped = parse_ihex(&f.dump_image(&mut Silent).unwrap().unwrap()).unwrap();

    let last = image.max_address().unwrap();
    for address in 0..=last {
        let expected = image.get(address).unwrap_or(0xff);
        let actual = dumped.get(address).unwrap_or(0xff);
        assert_eq!(actual, expected, "address 0x{:04x}", address);
    }
    assert!(dumped.max_address().unwrap() <= last);

    // the dump itself re-encodes to the same flash content
    let again = parse_ihex(&encode_image(&dumped).unwrap()).unwrap();
    assert_eq!(again, dumped);
}

#[test]
fn fuse_report_and_erase() {
    let sim = SimTarget::new(&chip()).with_flash(0x10, &[0x00; 16]);
    let mut f = flashing(sim);
    let report = f.read_fuses().unwrap();
    assert_eq!((report.low, report.high, report.lock), (0x6a, 0xff, 0xff));
    assert_eq!(f.identify().unwrap(), [0x1e, 0x90, 0x07]);
    f.dump_info().unwrap();

    f.erase().unwrap();
    let sim = f.into_inner();
    assert!(sim.flash().iter().all(|&b| b == 0xff));
    assert_eq!(sim.fuse_writes(), 0);
}
