use anyhow::Result;
use colored::*;
use csv::Writer;
use indicatif::HumanBytes;
use std::path::Path;
use vid_duper_core::ScanReport;

/// Human-readable listing of every group, representative first.
pub fn print_groups(report: &ScanReport) {
    for (index, group) in report.groups.iter().enumerate() {
        println!(
            "{} {} ({} reclaimable)",
            format!("Group {}", index + 1).bold(),
            format!("{} videos", group.len()).cyan(),
            HumanBytes(group.reclaimable_bytes)
        );
        if let Some(rep) = group.representative_member() {
            println!(
                "  {} {} [{}x{}, {:.0} kbps, {}] quality {:.3}",
                "keep".green(),
                rep.path.display(),
                rep.width,
                rep.height,
                rep.bitrate_kbps,
                HumanBytes(rep.size),
                rep.quality_score
            );
        }
        for member in group.members.iter().filter(|m| m.path != group.representative) {
            println!(
                "  {} {} [{}x{}, {:.0} kbps, {}] {:.1}% similar, quality {:.3}",
                "dupe".red(),
                member.path.display(),
                member.width,
                member.height,
                member.bitrate_kbps,
                HumanBytes(member.size),
                member.similarity * 100.0,
                member.quality_score
            );
            if member.differences.is_empty() {
                println!("       {}", "similar quality to the kept copy".dimmed());
            }
            for difference in &member.differences {
                println!("       {}", difference.to_string().dimmed());
            }
        }
    }
}

/// One row per group member.
pub fn write_groups_csv(report: &ScanReport, file_path: &Path) -> Result<usize> {
    let mut writer = Writer::from_path(file_path)?;

    writer.write_record([
        "group",
        "representative",
        "path",
        "size",
        "width",
        "height",
        "duration_secs",
        "fps",
        "bitrate_kbps",
        "quality_score",
        "similarity",
        "differences",
    ])?;

    let mut rows = 0usize;
    for (index, group) in report.groups.iter().enumerate() {
        for member in &group.members {
            writer.write_record(&[
                (index + 1).to_string(),
                (member.path == group.representative).to_string(),
                member.path.to_string_lossy().into_owned(),
                member.size.to_string(),
                member.width.to_string(),
                member.height.to_string(),
                format!("{:.3}", member.duration_secs),
                format!("{:.3}", member.fps),
                format!("{:.1}", member.bitrate_kbps),
                format!("{:.3}", member.quality_score),
                format!("{:.4}", member.similarity),
                member
                    .differences
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            ])?;
            rows += 1;
        }
    }

    writer.flush()?;

    Ok(rows)
}
