// File: plots.rs
// Volcano plots for differential expression, odds-ratio bars for mutation
// frequency by stage and Kaplan-Meier step curves.

use std::path::Path;

use plotters::prelude::*;
use polars::prelude::*;
use tracing::info;

use crate::analysis::differential_expression::{DeResult, DeRow};
use crate::analysis::mutation_association::MutationStageResult;
use crate::data_handling::annotation::ProbeAnnotation;
use crate::models::polars_err;
use crate::stats::survival::KaplanMeier;

const UP_SIGNIFICANT: RGBColor = RGBColor(0xE7, 0x4C, 0x3C);
const DOWN_SIGNIFICANT: RGBColor = RGBColor(0x34, 0x98, 0xDB);
const NOMINAL: RGBColor = RGBColor(0x95, 0xA5, 0xA6);
const BACKGROUND: RGBColor = RGBColor(0xD5, 0xD8, 0xDC);

const QUARTILE_COLORS: [RGBColor; 4] = [
    RGBColor(0x2E, 0xCC, 0x71),
    RGBColor(0x34, 0x98, 0xDB),
    RGBColor(0xF3, 0x9C, 0x12),
    RGBColor(0xE7, 0x4C, 0x3C),
];
// Low / Medium / High risk: green, orange, red
const RISK_COLORS: [RGBColor; 3] = [RGBColor(0, 128, 0), RGBColor(255, 165, 0), RGBColor(255, 0, 0)];
const SPLIT_COLORS: [RGBColor; 2] = [RGBColor(0x2E, 0xCC, 0x71), RGBColor(0xE7, 0x4C, 0x3C)];

fn neg_log10(p: f64) -> f64 {
    -p.max(1e-300).log10()
}

/// Volcano colour class: 0 up & FDR, 1 down & FDR, 2 nominal, 3 neither.
fn volcano_class(row: &DeRow, up_direction: &str, fdr: f64) -> usize {
    if row.fdr < fdr {
        if row.direction == up_direction {
            0
        } else {
            1
        }
    } else if row.p_value < 0.05 {
        2
    } else {
        3
    }
}

/// Log2FC against -log10 p. Dashed lines mark p = 0.05 and the largest p that
/// still passes `fdr`; `label_genes` are circled and named when annotated.
pub fn volcano_plot(
    result: &DeResult,
    annotation: Option<&ProbeAnnotation>,
    label_genes: &[String],
    fdr: f64,
    output_path: &Path,
) -> PolarsResult<()> {
    let up_direction = format!("{}_high", result.group2);
    let points: Vec<(f64, f64, usize)> = result
        .rows
        .iter()
        .filter(|r| r.log2fc.is_finite())
        .map(|r| (r.log2fc, neg_log10(r.p_value), volcano_class(r, &up_direction, fdr)))
        .collect();

    let x_max = points.iter().map(|p| p.0.abs()).fold(0.5, f64::max) * 1.1;
    let y_max = points.iter().map(|p| p.1).fold(2.0, f64::max) * 1.1;

    let root = BitMapBackend::new(output_path, (1200, 900)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!(
                "{}: {} (n={}) vs {} (n={})",
                result.label, result.group1, result.n1, result.group2, result.n2
            ),
            ("sans-serif", 22),
        )
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-x_max..x_max, 0.0..y_max)
        .map_err(|e| polars_err(Box::new(e)))?;

    chart
        .configure_mesh()
        .x_desc(format!("Log2 Fold Change ({} vs {})", result.group2, result.group1))
        .y_desc("-Log10(P-value)")
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    let classes = [
        (BACKGROUND, "Not significant".to_string()),
        (NOMINAL, "p<0.05".to_string()),
        (DOWN_SIGNIFICANT, format!("{}-high (FDR<{})", result.group1, fdr)),
        (UP_SIGNIFICANT, format!("{}-high (FDR<{})", result.group2, fdr)),
    ];
    // background first so significant points stay on top
    for (class, (color, label)) in [3usize, 2, 1, 0].into_iter().zip(classes) {
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.2 == class)
                    .map(|p| Circle::new((p.0, p.1), 2, color.mix(0.6).filled())),
            )
            .map_err(|e| polars_err(Box::new(e)))?
            .label(label)
            .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
    }

    let nominal_y = neg_log10(0.05);
    chart
        .draw_series(DashedLineSeries::new(
            vec![(-x_max, nominal_y), (x_max, nominal_y)],
            6,
            4,
            NOMINAL.stroke_width(1),
        ))
        .map_err(|e| polars_err(Box::new(e)))?;
    if let Some(p) = result.fdr_p_threshold(fdr) {
        let y = neg_log10(p);
        chart
            .draw_series(DashedLineSeries::new(
                vec![(-x_max, y), (x_max, y)],
                6,
                4,
                RED.stroke_width(1),
            ))
            .map_err(|e| polars_err(Box::new(e)))?
            .label(format!("FDR={fdr} threshold"))
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    }

    if let Some(annotation) = annotation {
        for gene in label_genes {
            // rows are sorted by p, so the first hit is the strongest probe
            let Some(row) = result
                .rows
                .iter()
                .find(|r| annotation.gene(&r.probe) == Some(gene.as_str()) && r.log2fc.is_finite())
            else {
                continue;
            };
            let at = (row.log2fc, neg_log10(row.p_value));
            let color = if row.direction == up_direction { UP_SIGNIFICANT } else { DOWN_SIGNIFICANT };
            chart
                .draw_series(std::iter::once(Circle::new(at, 6, color.filled())))
                .map_err(|e| polars_err(Box::new(e)))?;
            chart
                .draw_series(std::iter::once(Circle::new(at, 6, BLACK.stroke_width(2))))
                .map_err(|e| polars_err(Box::new(e)))?;
            chart
                .draw_series(std::iter::once(Text::new(
                    gene.clone(),
                    (at.0 + x_max * 0.015, at.1),
                    ("sans-serif", 16).into_font(),
                )))
                .map_err(|e| polars_err(Box::new(e)))?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    root.present().map_err(|e| polars_err(Box::new(e)))?;
    info!("Saved: {}", output_path.display());
    Ok(())
}

// |log2 OR| drawn for a zero odds ratio
const LOG2_OR_LIMIT: f64 = 10.0;
const MAX_OR_BARS: usize = 30;

/// Genes with p below `p_max` and their clamped log2 odds ratio (Limited vs
/// Advanced), most significant first.
pub fn odds_ratio_bars(result: &MutationStageResult, p_max: f64) -> Vec<(String, f64)> {
    result
        .rows
        .iter()
        .filter(|r| r.p_value < p_max && !r.odds_ratio.is_nan())
        .take(MAX_OR_BARS)
        .map(|r| (r.gene.clone(), r.odds_ratio.log2().clamp(-LOG2_OR_LIMIT, LOG2_OR_LIMIT)))
        .collect()
}

/// Horizontal log2(OR) bars; positive bars are enriched in limited stage.
/// Nothing is written when no gene passes `p_max`.
pub fn odds_ratio_plot(result: &MutationStageResult, p_max: f64, output_path: &Path) -> PolarsResult<()> {
    let bars = odds_ratio_bars(result, p_max);
    if bars.is_empty() {
        info!("No genes with p < {}; skipping odds-ratio plot", p_max);
        return Ok(());
    }
    let x_max = bars.iter().map(|b| b.1.abs()).fold(1.0, f64::max) * 1.1;
    let n = bars.len();
    let height = (200 + 28 * n) as u32;

    let root = BitMapBackend::new(output_path, (1000, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!(
                "Mutation frequency: Limited (n={}) vs Advanced (n={}), p < {}",
                result.n_limited, result.n_advanced, p_max
            ),
            ("sans-serif", 20),
        )
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(110)
        .build_cartesian_2d(-x_max..x_max, 0.0..n as f64)
        .map_err(|e| polars_err(Box::new(e)))?;

    // most significant gene at the top
    let label_of = |y: &f64| {
        let slot = y.floor();
        if slot < 0.0 || slot >= n as f64 || (y - slot - 0.5).abs() > 0.25 {
            return String::new();
        }
        bars[n - 1 - slot as usize].0.clone()
    };
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(2 * n + 1)
        .y_label_formatter(&label_of)
        .x_desc("log2(Odds Ratio), Limited vs Advanced")
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, (_, v))| {
            let y0 = (n - 1 - i) as f64 + 0.15;
            let color = if *v >= 0.0 { DOWN_SIGNIFICANT } else { UP_SIGNIFICANT };
            Rectangle::new([(0.0, y0), (*v, y0 + 0.7)], color.mix(0.8).filled())
        }))
        .map_err(|e| polars_err(Box::new(e)))?;
    chart
        .draw_series(LineSeries::new(vec![(0.0, 0.0), (0.0, n as f64)], BLACK.stroke_width(1)))
        .map_err(|e| polars_err(Box::new(e)))?;

    root.present().map_err(|e| polars_err(Box::new(e)))?;
    info!("Saved: {}", output_path.display());
    Ok(())
}

/// Colours for `n` survival curves: High/Low, tertile risk groups or quartiles.
pub fn km_palette(n: usize) -> Vec<RGBColor> {
    match n {
        2 => SPLIT_COLORS.to_vec(),
        3 => RISK_COLORS.to_vec(),
        _ => (0..n).map(|i| QUARTILE_COLORS[i % QUARTILE_COLORS.len()]).collect(),
    }
}

/// Vertices of the right-continuous step function, from (0, 1) to the last observed time.
pub fn km_step_points(km: &KaplanMeier) -> Vec<(f64, f64)> {
    let mut points = vec![(0.0, 1.0)];
    let mut current = 1.0;
    for step in &km.steps {
        points.push((step.time, current));
        points.push((step.time, step.survival));
        current = step.survival;
    }
    let end = km.max_time.max(points.last().map_or(0.0, |p| p.0));
    points.push((end, current));
    points
}

/// One step curve per labelled group, with the log-rank p in the caption when given.
pub fn km_plot(
    curves: &[(String, KaplanMeier)],
    title: &str,
    logrank_p: Option<f64>,
    output_path: &Path,
) -> PolarsResult<()> {
    let x_max = curves
        .iter()
        .map(|(_, km)| km.max_time)
        .fold(1.0, f64::max)
        * 1.02;
    let caption = match logrank_p {
        Some(p) => format!("{title} (log-rank p = {p:.2e})"),
        None => title.to_string(),
    };

    let root = BitMapBackend::new(output_path, (1000, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 22))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..x_max, 0.0..1.05)
        .map_err(|e| polars_err(Box::new(e)))?;

    chart
        .configure_mesh()
        .x_desc("Time (years)")
        .y_desc("Overall Survival Probability")
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    let palette = km_palette(curves.len());
    for ((label, km), color) in curves.iter().zip(palette) {
        if km.n == 0 {
            continue;
        }
        chart
            .draw_series(LineSeries::new(km_step_points(km), color.stroke_width(2)))
            .map_err(|e| polars_err(Box::new(e)))?
            .label(label.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::LowerLeft)
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    root.present().map_err(|e| polars_err(Box::new(e)))?;
    info!("Saved: {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::survival::kaplan_meier;

    #[test]
    fn step_points_drop_at_events() {
        let km = kaplan_meier(&[1.0, 2.0, 3.0, 4.0], &[true, false, true, false]);
        let pts = km_step_points(&km);
        assert_eq!(pts.first(), Some(&(0.0, 1.0)));
        assert_eq!(pts[1], (1.0, 1.0));
        assert_eq!(pts[2], (1.0, 0.75));
        // censored at 4: the curve runs flat to the last observation
        assert_eq!(pts.last().map(|p| p.0), Some(4.0));
        assert_eq!(pts.len(), 6);
    }

    #[test]
    fn palette_follows_group_count() {
        assert_eq!(km_palette(2)[1], RGBColor(0xE7, 0x4C, 0x3C));
        assert_eq!(km_palette(3)[0], RGBColor(0, 128, 0));
        assert_eq!(km_palette(4).len(), 4);
    }

    #[test]
    fn odds_ratio_bars_keep_significant_genes_and_clamp() {
        use crate::analysis::mutation_association::MutationStageRow;
        use crate::data_handling::clinical::StageGroup;

        let row = |gene: &str, odds_ratio: f64, p_value: f64| MutationStageRow {
            gene: gene.into(),
            limited_n: 1,
            limited_pct: 5.0,
            advanced_n: 10,
            advanced_pct: 20.0,
            total_mut: 11,
            odds_ratio,
            p_value,
            fdr: p_value,
            direction: StageGroup::Advanced,
        };
        let result = MutationStageResult {
            n_limited: 20,
            n_advanced: 50,
            rows: vec![
                row("EZH2", 999.0, 0.001),
                row("KMT2D", 0.25, 0.01),
                row("CREBBP", 0.0, 0.02),
                row("UNDEF", f64::NAN, 0.03),
                row("TP53", 2.0, 0.2),
            ],
        };
        let bars = odds_ratio_bars(&result, 0.05);
        let genes: Vec<&str> = bars.iter().map(|b| b.0.as_str()).collect();
        assert_eq!(genes, vec!["EZH2", "KMT2D", "CREBBP"]);
        assert!((bars[0].1 - 999f64.log2()).abs() < 1e-12);
        assert_eq!(bars[1].1, -2.0);
        assert_eq!(bars[2].1, -LOG2_OR_LIMIT);

        let dir = tempfile::tempdir().unwrap();
        let none = dir.path().join("none.png");
        odds_ratio_plot(&result, 1e-6, &none).unwrap();
        assert!(!none.exists());
    }

    #[test]
    fn volcano_classes() {
        let row = |fdr: f64, p: f64, dir: &str| DeRow {
            probe: "p".into(),
            mean1: 1.0,
            mean2: 2.0,
            log2fc: 1.0,
            cohens_d: 0.5,
            t_stat: -2.0,
            p_value: p,
            fdr,
            direction: dir.into(),
        };
        assert_eq!(volcano_class(&row(0.01, 0.001, "B_high"), "B_high", 0.1), 0);
        assert_eq!(volcano_class(&row(0.01, 0.001, "A_high"), "B_high", 0.1), 1);
        assert_eq!(volcano_class(&row(0.3, 0.01, "A_high"), "B_high", 0.1), 2);
        assert_eq!(volcano_class(&row(0.9, 0.5, "A_high"), "B_high", 0.1), 3);
    }
}
