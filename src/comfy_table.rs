use crate::ai_analysis::{AiAssessment, RiskLevel};
use crate::find_tickers::Instrument;
use crate::signal::SignalResult;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

/// Rows shown on the console; the CSV keeps everything.
pub const MAX_TABLE_ROWS: usize = 25;

/// Fades lower-ranked rows, never below 40% intensity.
pub fn visibility_ratio(score: f64, top_score: f64) -> f64 {
    if top_score <= 0.0 {
        1.0
    } else {
        (0.4 + 0.6 * (score / top_score)).max(0.4)
    }
}

fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let cell = Cell::new(label).add_attribute(Attribute::Bold);
            if i >= 2 {
                cell.set_alignment(CellAlignment::Right)
            } else {
                cell
            }
        })
        .collect()
}

fn styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Ranked signal table; expects `results` already sorted best-first.
pub fn render_results(results: &[SignalResult]) -> Table {
    let mut table = styled_table();
    table.set_header(header(&["Rank", "Symbol", "Score", "Close", "RSI", "Vol x"]));

    let top_score = results.first().map_or(1.0, |r| r.score);

    for (i, result) in results.iter().take(MAX_TABLE_ROWS).enumerate() {
        let ratio = visibility_ratio(result.score, top_score);
        let cyan = (255.0 * ratio) as u8;
        let green = (255.0 * ratio) as u8;
        let gray = (150.0 * ratio) as u8;
        let grey = Color::Rgb {
            r: gray,
            g: gray,
            b: gray,
        };

        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&result.symbol).fg(Color::Rgb {
                r: 0,
                g: cyan,
                b: cyan,
            }),
            Cell::new(format!("{:.2}", result.score))
                .fg(Color::Rgb {
                    r: 0,
                    g: green,
                    b: 0,
                })
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", result.close_price))
                .fg(grey)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", result.rsi))
                .fg(grey)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", result.volume_ratio))
                .fg(grey)
                .set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// Catalog listing with 24h statistics.
pub fn render_instruments(instruments: &[&Instrument]) -> Table {
    let mut table = styled_table();
    table.set_header(header(&["#", "Symbol", "Quote vol 24h", "Change 24h", "Trades 24h"]));

    for (i, instrument) in instruments.iter().enumerate() {
        let change = instrument.price_change_percent_24h;
        let change_color = if change >= 0.0 { Color::Green } else { Color::Red };
        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&instrument.symbol).fg(Color::Cyan),
            Cell::new(format!("{:.0}", instrument.quote_volume_24h))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}%", change))
                .fg(change_color)
                .set_alignment(CellAlignment::Right),
            Cell::new(instrument.count_24h).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

fn risk_color(level: &RiskLevel) -> Color {
    match level {
        RiskLevel::Low => Color::Green,
        RiskLevel::Medium => Color::Yellow,
        RiskLevel::High => Color::DarkYellow,
        RiskLevel::VeryHighOrScam => Color::Red,
        RiskLevel::AnalysisError | RiskLevel::Other(_) => Color::DarkGrey,
    }
}

pub fn render_assessments(assessments: &[AiAssessment]) -> Table {
    let mut table = styled_table();
    table.set_header(
        ["Symbol", "Risk", "Summary", "Long term", "Swing", "Day trading"]
            .map(|label| Cell::new(label).add_attribute(Attribute::Bold)),
    );

    for a in assessments {
        table.add_row(vec![
            Cell::new(&a.symbol).fg(Color::Cyan),
            Cell::new(a.risk_level.label()).fg(risk_color(&a.risk_level)),
            Cell::new(&a.summary),
            Cell::new(&a.long_term_outlook),
            Cell::new(&a.medium_term_outlook),
            Cell::new(&a.short_term_outlook),
        ]);
    }
    table
}
