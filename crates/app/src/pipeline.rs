// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use std::time::Instant;

use crossbeam::channel;

use llsniff_output::pcap::{CaptureRecord, PcapReader, PcapWriter};
use llsniff_protocol::session::SessionStats;
use llsniff_protocol::{CaptureSession, DecoderConfig};

fn print_stats(label: &str, elapsed: f64, s: &SessionStats) {
    let crc_pct = if s.crc_checked > 0 {
        (s.crc_valid as f64 / s.crc_checked as f64) * 100.0
    } else {
        0.0
    };
    eprintln!(
        "{} ({:.1}s): packets: {} decode errors: {} framing errors: {} CRC: {:.1}% ({}/{})",
        label, elapsed, s.packets, s.decode_errors, s.framing_errors, crc_pct, s.crc_valid, s.crc_checked,
    );
}

/// Decode a capture file, print every packet, optionally re-write it.
pub fn run_file(
    file_path: &Path,
    pcap_path: Option<&Path>,
    config: DecoderConfig,
    show_stats: bool,
) -> Result<SessionStats, String> {
    let input = File::open(file_path).map_err(|e| format!("failed to open {}: {}", file_path.display(), e))?;
    let reader = PcapReader::new(BufReader::new(input))
        .map_err(|e| format!("failed to read PCAP header: {}", e))?;

    let mut pcap_writer: Option<PcapWriter<BufWriter<File>>> = if let Some(path) = pcap_path {
        let file = File::create(path).map_err(|e| format!("failed to create {}: {}", path.display(), e))?;
        let writer = BufWriter::new(file);
        Some(PcapWriter::new(writer).map_err(|e| format!("failed to write PCAP header: {}", e))?)
    } else {
        None
    };

    let mut session = CaptureSession::new(config);
    let stats_start = Instant::now();
    let mut last_stats = Instant::now();

    let (tx, rx) = channel::bounded::<io::Result<CaptureRecord>>(64);

    // Records are parsed on a reader thread; decoding stays on this one
    let reader_thread = std::thread::spawn(move || {
        for rec in reader {
            // a malformed record is already consumed; the next one is still aligned
            let fatal = matches!(&rec, Err(e) if e.kind() != io::ErrorKind::InvalidData);
            if tx.send(rec).is_err() || fatal {
                break;
            }
        }
    });

    for rec in rx.iter() {
        let rec = match rec {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                log::warn!("dropping capture record: {}", e);
                session.record_framing_error();
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                log::warn!("capture truncated: {}", e);
                session.record_framing_error();
                break;
            }
            Err(e) => return Err(format!("read error: {}", e)),
        };

        session.anchor(rec.frame.tick, rec.ts_epoch);
        let pkt = session.process_frame(rec.frame);
        println!("{}\n", pkt);

        if let Some(ref mut writer) = pcap_writer {
            if let Err(e) = writer.write_packet(&pkt) {
                log::error!("pcap write failed: {}", e);
            }
        }

        // Print stats every 5 seconds
        if show_stats && last_stats.elapsed().as_secs() >= 5 {
            print_stats("progress", stats_start.elapsed().as_secs_f64(), session.stats());
            last_stats = Instant::now();
        }
    }

    if let Some(ref mut writer) = pcap_writer {
        writer.flush().map_err(|e| format!("pcap flush failed: {}", e))?;
    }

    // Final stats
    if show_stats {
        print_stats("done", stats_start.elapsed().as_secs_f64(), session.stats());
    }

    // Wait for reader thread
    let _ = reader_thread.join();

    Ok(session.stats().clone())
}
