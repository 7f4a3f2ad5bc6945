use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use rust_xlsxwriter::{Color, Format, Workbook};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::calc::{self, GradeStatus};
use crate::store::CourseSnapshot;

const FILL_FAILED: Color = Color::RGB(0xFFCCCC);
const FILL_PASSED: Color = Color::RGB(0xCCFFCC);
const FILL_PROMOTED: Color = Color::RGB(0xCCE5FF);

const FONT_PCT_HIGH: Color = Color::RGB(0x006400);
const FONT_PCT_MID: Color = Color::RGB(0x8B8000);
const FONT_PCT_LOW: Color = Color::RGB(0xDC143C);

/// A finished export on disk.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Course names go into filenames; everything that is not ASCII
/// alphanumeric becomes an underscore.
pub fn sanitize_course_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn export_file_name(prefix: &str, course_name: &str, date: NaiveDate) -> String {
    format!(
        "{}_{}_{}.xlsx",
        prefix,
        sanitize_course_name(course_name),
        date.format("%Y%m%d")
    )
}

fn status_fill(status: GradeStatus) -> Color {
    match status {
        GradeStatus::Failed => FILL_FAILED,
        GradeStatus::Passed => FILL_PASSED,
        GradeStatus::Promoted => FILL_PROMOTED,
    }
}

fn widen(widths: &mut Vec<usize>, col: usize, text: &str) {
    if widths.len() <= col {
        widths.resize(col + 1, 0);
    }
    widths[col] = widths[col].max(text.chars().count());
}

/// Builds the grades workbook: title, one column per evaluation with
/// classification fills, grouped-average columns and the final average.
/// Returns the xlsx bytes; the caller decides where they land.
pub fn build_grades_workbook(
    snapshot: &CourseSnapshot,
    subject_id: Option<i64>,
) -> anyhow::Result<Vec<u8>> {
    let evaluations: Vec<&crate::model::Evaluation> = snapshot
        .evaluations
        .iter()
        .filter(|e| subject_id.is_none() || e.subject_id == subject_id)
        .collect();
    if snapshot.students.is_empty() {
        return Err(anyhow!("course has no students to export"));
    }
    if evaluations.is_empty() {
        return Err(anyhow!("course has no evaluations to export"));
    }

    let averages = calc::grouped_averages(
        &snapshot.students,
        &snapshot.evaluations,
        &snapshot.evaluation_types,
        &snapshot.grades,
        &snapshot.grade_scales,
        subject_id,
    );
    // Union of the types that appear in any student's groups, in group
    // order, so every row has the same columns.
    let mut type_columns: Vec<(i64, String)> = Vec::new();
    for row in &averages {
        for g in &row.grouped_averages {
            if !type_columns.iter().any(|(id, _)| *id == g.evaluation_type_id) {
                type_columns.push((g.evaluation_type_id, g.evaluation_type_name.clone()));
            }
        }
    }
    type_columns.sort_by_key(|(id, _)| *id);

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Notas")?;

    let title_format = Format::new().set_bold().set_font_size(14);
    let header_format = Format::new().set_bold();
    let bold = Format::new().set_bold();

    let total_cols = 1 + evaluations.len() + type_columns.len() + 1;
    sheet.merge_range(
        0,
        0,
        0,
        (total_cols - 1) as u16,
        &format!("Planilla de Notas - {}", snapshot.course.name),
        &title_format,
    )?;

    let mut widths: Vec<usize> = Vec::new();
    let header_row = 2u32;
    sheet.write_string_with_format(header_row, 0, "Alumno", &header_format)?;
    widen(&mut widths, 0, "Alumno");
    let mut col = 1u16;
    for e in &evaluations {
        let label = match e.date {
            Some(d) => format!("{} ({})", e.name, d.format("%d/%m/%Y")),
            None => e.name.clone(),
        };
        sheet.write_string_with_format(header_row, col, &label, &header_format)?;
        widen(&mut widths, col as usize, &label);
        col += 1;
    }
    for (_, name) in &type_columns {
        let label = format!("Prom. {}", name);
        sheet.write_string_with_format(header_row, col, &label, &header_format)?;
        widen(&mut widths, col as usize, &label);
        col += 1;
    }
    sheet.write_string_with_format(header_row, col, "Prom. Final", &header_format)?;
    widen(&mut widths, col as usize, "Prom. Final");

    for (i, student) in snapshot.students.iter().enumerate() {
        let row = header_row + 1 + i as u32;
        let name = student.display_name();
        sheet.write_string(row, 0, &name)?;
        widen(&mut widths, 0, &name);

        let mut col = 1u16;
        for e in &evaluations {
            let grade = snapshot
                .grades
                .iter()
                .find(|g| g.student_id == student.id && g.evaluation_id == e.id);
            if let Some(grade) = grade {
                let text = grade.value.display();
                match calc::numeric_grade_value(grade, Some(e), &snapshot.grade_scales) {
                    Some(value) => {
                        let (approval, qualification) = calc::thresholds(e, &snapshot.course);
                        let status = calc::classify(value, approval, qualification);
                        let format = Format::new().set_background_color(status_fill(status));
                        sheet.write_string_with_format(row, col, &text, &format)?;
                    }
                    None => {
                        sheet.write_string(row, col, &text)?;
                    }
                }
                widen(&mut widths, col as usize, &text);
            }
            col += 1;
        }

        let student_averages = averages.iter().find(|a| a.student_id == student.id);
        for (type_id, _) in &type_columns {
            if let Some(avg) = student_averages.and_then(|a| {
                a.grouped_averages
                    .iter()
                    .find(|g| g.evaluation_type_id == *type_id)
            }) {
                let text = format!("{:.2}", avg.average);
                sheet.write_string(row, col, &text)?;
                widen(&mut widths, col as usize, &text);
            }
            col += 1;
        }
        if let Some(final_avg) = student_averages.and_then(|a| a.final_average) {
            let text = format!("{:.2}", final_avg);
            sheet.write_string_with_format(row, col, &text, &bold)?;
            widen(&mut widths, col as usize, &text);
        }
    }

    for (col, width) in widths.iter().enumerate() {
        sheet.set_column_width(col as u16, (*width).max(10) as f64 + 3.0)?;
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

/// Builds the attendance workbook: one column per taken date with P/A
/// cells and a banded percentage column.
pub fn build_attendance_workbook(
    snapshot: &CourseSnapshot,
    subject_id: Option<i64>,
) -> anyhow::Result<Vec<u8>> {
    if snapshot.students.is_empty() {
        return Err(anyhow!("course has no students to export"));
    }
    let summary = calc::attendance_summary(&snapshot.students, &snapshot.attendance, subject_id);
    if summary.dates.is_empty() {
        return Err(anyhow!("course has no attendance dates to export"));
    }

    let mut present: std::collections::HashMap<(NaiveDate, i64), bool> =
        std::collections::HashMap::new();
    for r in &snapshot.attendance {
        if subject_id.is_none() || r.subject_id == subject_id {
            present.insert((r.date, r.student_id), r.present);
        }
    }

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Asistencias")?;

    let title_format = Format::new().set_bold().set_font_size(14);
    let header_format = Format::new().set_bold();
    let present_format = Format::new().set_background_color(FILL_PASSED);
    let absent_format = Format::new().set_background_color(FILL_FAILED);

    let total_cols = 1 + summary.dates.len() + 1;
    sheet.merge_range(
        0,
        0,
        0,
        (total_cols - 1) as u16,
        &format!("Asistencias - {}", snapshot.course.name),
        &title_format,
    )?;

    let mut widths: Vec<usize> = Vec::new();
    let header_row = 2u32;
    sheet.write_string_with_format(header_row, 0, "Alumno", &header_format)?;
    widen(&mut widths, 0, "Alumno");
    let mut col = 1u16;
    for d in &summary.dates {
        let label = d.format("%d/%m/%Y").to_string();
        sheet.write_string_with_format(header_row, col, &label, &header_format)?;
        widen(&mut widths, col as usize, &label);
        col += 1;
    }
    sheet.write_string_with_format(header_row, col, "% Asistencia", &header_format)?;
    widen(&mut widths, col as usize, "% Asistencia");

    for (i, student) in snapshot.students.iter().enumerate() {
        let row = header_row + 1 + i as u32;
        let name = student.display_name();
        sheet.write_string(row, 0, &name)?;
        widen(&mut widths, 0, &name);

        let mut col = 1u16;
        for d in &summary.dates {
            let was_present = present.get(&(*d, student.id)).copied().unwrap_or(false);
            if was_present {
                sheet.write_string_with_format(row, col, "P", &present_format)?;
            } else {
                sheet.write_string_with_format(row, col, "A", &absent_format)?;
            }
            col += 1;
        }

        if let Some(pct) = summary
            .students
            .iter()
            .find(|s| s.student_id == student.id)
            .and_then(|s| s.percentage)
        {
            let font = if pct >= 90 {
                FONT_PCT_HIGH
            } else if pct >= 75 {
                FONT_PCT_MID
            } else {
                FONT_PCT_LOW
            };
            let format = Format::new().set_bold().set_font_color(font);
            let text = format!("{}%", pct);
            sheet.write_string_with_format(row, col, &text, &format)?;
            widen(&mut widths, col as usize, &text);
        }
    }

    for (col, width) in widths.iter().enumerate() {
        sheet.set_column_width(col as u16, (*width).max(10) as f64 + 3.0)?;
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

/// Writes workbook bytes to `out_dir/file_name` through a `.part` rename,
/// so a failure never leaves a half-written xlsx at the final path.
pub fn write_artifact(
    out_dir: &Path,
    file_name: &str,
    data: &[u8],
) -> anyhow::Result<ExportArtifact> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))?;
    let final_path = out_dir.join(file_name);
    let part_path = out_dir.join(format!("{}.part", file_name));

    std::fs::write(&part_path, data)
        .with_context(|| format!("failed to write {}", part_path.to_string_lossy()))?;
    if let Err(e) = std::fs::rename(&part_path, &final_path) {
        let _ = std::fs::remove_file(&part_path);
        return Err(e).with_context(|| {
            format!("failed to move artifact to {}", final_path.to_string_lossy())
        });
    }

    Ok(ExportArtifact {
        file_name: file_name.to_string(),
        path: final_path.to_string_lossy().to_string(),
        bytes: data.len() as u64,
        sha256: format!("{:x}", Sha256::digest(data)),
    })
}
