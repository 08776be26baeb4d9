//! ==============================================================================
//! view.rs - dashboard rendering
//! ==============================================================================
//!
//! purpose:
//!     turns a DashboardState snapshot into html. stateless: the same state
//!     always renders the same page (apart from local-time labels).
//!
//! layout:
//!     - device selector
//!     - latest cards (temperature, humidity, light, plant metrics)
//!     - three svg line charts
//!     - csv export form
//!     - camera images of the latest record
//!     - manual refresh
//!
//! charts are plain inline svg. data space is mapped to the plot area through
//! DataBounds, the same way a fixed-size display maps readings to pixels.
//!
//! ==============================================================================

use std::fmt::Write as _;

use chrono::{Local, TimeZone};

use crate::domain::{ChartPoint, SensorRecord};
use crate::state::{DashboardState, Phase};

pub const PLACEHOLDER: &str = "---";

const CHART_WIDTH: f64 = 960.0;
const CHART_HEIGHT: f64 = 320.0;
const PADDING_LEFT: f64 = 56.0;
const PADDING_RIGHT: f64 = 56.0;
const PADDING_TOP: f64 = 16.0;
const PADDING_BOTTOM: f64 = 40.0;
/// fraction of the value range added above and below the data
const MARGIN_FACTOR: f64 = 0.05;
/// keeps flat series from collapsing to a zero-height range
const MIN_DATA_RANGE: f64 = 1.0;
/// at most this many x-axis labels per chart
const MAX_X_LABELS: usize = 8;

// ==============================================================================
// chart projections
// ==============================================================================

pub fn format_label_in<Tz: TimeZone>(timestamp: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match tz.timestamp_opt(timestamp, 0).single() {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

fn project<F>(records: &[SensorRecord], values: F) -> Vec<ChartPoint>
where
    F: Fn(&SensorRecord) -> (Option<f64>, Option<f64>),
{
    records
        .iter()
        .map(|r| {
            let (primary, secondary) = values(r);
            ChartPoint {
                label: format_label_in(r.timestamp, &Local),
                x: r.timestamp,
                primary,
                secondary,
            }
        })
        .collect()
}

pub fn temperature_humidity_points(records: &[SensorRecord]) -> Vec<ChartPoint> {
    project(records, |r| (r.temperature, r.humidity))
}

pub fn light_points(records: &[SensorRecord]) -> Vec<ChartPoint> {
    project(records, |r| (r.uv_light, r.iv_light))
}

pub fn plant_points(records: &[SensorRecord]) -> Vec<ChartPoint> {
    project(records, |r| (r.stem, r.fruit_diagram))
}

// ==============================================================================
// latest cards
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub title: &'static str,
    pub value: String,
    pub unit: &'static str,
}

pub fn latest_cards(latest: Option<&SensorRecord>) -> Vec<Card> {
    let card = |title, unit, metric: fn(&SensorRecord) -> Option<f64>, fixed: bool| Card {
        title,
        value: latest
            .and_then(metric)
            .map(|v| if fixed { format!("{v:.2}") } else { v.to_string() })
            .unwrap_or_else(|| PLACEHOLDER.to_string()),
        unit,
    };

    vec![
        card("Temperature", "°C", |r| r.temperature, true),
        card("Humidity", "%", |r| r.humidity, true),
        card("External light", "lx", |r| r.uv_light, false),
        card("Internal light", "lx", |r| r.iv_light, false),
        card("Stem", "", |r| r.stem, false),
        card("Fruit diagram", "", |r| r.fruit_diagram, false),
    ]
}

// ==============================================================================
// svg charts
// ==============================================================================

/// data space bounds (min/max x and y values)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl DataBounds {
    /// bounds of one value series with a margin on the y axis
    pub fn from_series(xs: &[f64], ys: &[f64], margin_factor: f64) -> Option<Self> {
        let fold = |values: &[f64]| {
            values
                .iter()
                .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                    None => Some((v, v)),
                })
        };
        let (x_min, x_max) = fold(xs)?;
        let (y_min, y_max) = fold(ys)?;

        let x_range = (x_max - x_min).max(MIN_DATA_RANGE);
        let y_range = (y_max - y_min).max(MIN_DATA_RANGE);
        let y_margin = y_range * margin_factor;
        // center degenerate ranges
        let x_pad = (x_range - (x_max - x_min)) / 2.0;
        let y_pad = (y_range - (y_max - y_min)) / 2.0;

        Some(Self {
            x_min: x_min - x_pad,
            x_max: x_max + x_pad,
            y_min: y_min - y_pad - y_margin,
            y_max: y_max + y_pad + y_margin,
        })
    }

    pub fn x_range(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn y_range(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// data point -> svg coordinates inside the plot area
    pub fn to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        let plot_w = CHART_WIDTH - PADDING_LEFT - PADDING_RIGHT;
        let plot_h = CHART_HEIGHT - PADDING_TOP - PADDING_BOTTOM;
        let sx = PADDING_LEFT + (x - self.x_min) / self.x_range() * plot_w;
        let sy = PADDING_TOP + (1.0 - (y - self.y_min) / self.y_range()) * plot_h;
        (sx, sy)
    }
}

struct Series<'a> {
    name: &'a str,
    color: &'a str,
    values: Vec<f64>,
}

fn polyline(bounds: &DataBounds, xs: &[f64], series: &Series<'_>) -> String {
    let points: Vec<String> = xs
        .iter()
        .zip(&series.values)
        .map(|(&x, &y)| {
            let (sx, sy) = bounds.to_screen(x, y);
            format!("{sx:.1},{sy:.1}")
        })
        .collect();
    format!(
        r#"<polyline fill="none" stroke="{}" stroke-width="2" points="{}"><title>{}</title></polyline>"#,
        series.color,
        points.join(" "),
        html_escape(series.name)
    )
}

/// a two-series line chart; the primary series uses the left axis, the
/// secondary its own right axis
fn svg_chart(points: &[ChartPoint], primary: (&str, &str), secondary: (&str, &str)) -> String {
    if points.is_empty() {
        return r#"<p class="empty">No data to chart.</p>"#.to_string();
    }

    let xs: Vec<f64> = points.iter().map(|p| p.x as f64).collect();
    let left = Series {
        name: primary.0,
        color: primary.1,
        values: points.iter().map(|p| p.primary.unwrap_or(f64::NAN)).collect(),
    };
    let right = Series {
        name: secondary.0,
        color: secondary.1,
        values: points.iter().map(|p| p.secondary.unwrap_or(f64::NAN)).collect(),
    };

    let mut svg = format!(
        r#"<svg viewBox="0 0 {CHART_WIDTH} {CHART_HEIGHT}" class="chart" role="img">"#
    );

    let axis_bottom = CHART_HEIGHT - PADDING_BOTTOM;
    let _ = write!(
        svg,
        r##"<line x1="{PADDING_LEFT}" y1="{axis_bottom}" x2="{}" y2="{axis_bottom}" stroke="#ccc"/>"##,
        CHART_WIDTH - PADDING_RIGHT
    );

    for (series, anchor_x, anchor) in [
        (&left, PADDING_LEFT - 6.0, "end"),
        (&right, CHART_WIDTH - PADDING_RIGHT + 6.0, "start"),
    ] {
        let finite: Vec<(f64, f64)> = xs
            .iter()
            .copied()
            .zip(series.values.iter().copied())
            .filter(|(_, y)| y.is_finite())
            .collect();
        let (fx, fy): (Vec<f64>, Vec<f64>) = finite.into_iter().unzip();
        let Some(bounds) = DataBounds::from_series(&fx, &fy, MARGIN_FACTOR) else {
            continue;
        };

        svg.push_str(&polyline(&bounds, &fx, &Series { name: series.name, color: series.color, values: fy }));
        for y in [bounds.y_min, bounds.y_max] {
            let (_, sy) = bounds.to_screen(bounds.x_min, y);
            let _ = write!(
                svg,
                r#"<text x="{anchor_x}" y="{sy:.1}" text-anchor="{anchor}" fill="{}" font-size="11">{y:.1}</text>"#,
                series.color
            );
        }
    }

    let step = points.len().div_ceil(MAX_X_LABELS).max(1);
    let x_bounds = DataBounds::from_series(&xs, &[0.0], 0.0);
    if let Some(bounds) = x_bounds {
        for point in points.iter().step_by(step) {
            let (sx, _) = bounds.to_screen(point.x as f64, 0.0);
            let _ = write!(
                svg,
                r##"<text x="{sx:.1}" y="{}" text-anchor="middle" fill="#666" font-size="11">{}</text>"##,
                axis_bottom + 18.0,
                html_escape(&point.label)
            );
        }
    }

    svg.push_str("</svg>");
    let _ = write!(
        svg,
        r#"<div class="legend"><span style="color:{}">■ {}</span> <span style="color:{}">■ {}</span></div>"#,
        left.color,
        html_escape(left.name),
        right.color,
        html_escape(right.name)
    );
    svg
}

// ==============================================================================
// pages
// ==============================================================================

const STYLE: &str = r#"
body { font-family: system-ui; margin: 0; padding: 2rem; background: #f5f7fa; color: #222; }
.container { max-width: 1040px; margin: 0 auto; }
h1 { text-align: center; }
section { background: #fff; border-radius: 8px; padding: 1rem 1.5rem; margin-bottom: 2rem; box-shadow: 0 1px 3px rgba(0,0,0,.1); }
.cards { display: grid; grid-template-columns: repeat(auto-fit, minmax(150px, 1fr)); gap: 1rem; }
.card { background: #fff; border-radius: 8px; padding: 1rem; text-align: center; box-shadow: 0 1px 3px rgba(0,0,0,.1); }
.card .value { font-size: 1.6rem; font-weight: 600; }
.chart { width: 100%; height: auto; }
.legend { text-align: center; font-size: .9rem; }
.banner { background: #fff3cd; border: 1px solid #ffe69c; padding: .75rem 1rem; border-radius: 8px; margin-bottom: 1rem; }
.error { color: #c0392b; }
.images { display: grid; grid-template-columns: repeat(auto-fit, minmax(280px, 1fr)); gap: 1rem; }
.images img { width: 100%; border-radius: 8px; }
form.inline { display: flex; gap: 1rem; justify-content: center; align-items: center; flex-wrap: wrap; }
.actions { text-align: center; }
"#;

/// escape html special characters to prevent xss
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, head_extra: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>{}</title>
{head_extra}
<style>{STYLE}</style>
</head>
<body id="top"><div class="container">
{body}
</div></body>
</html>"#,
        html_escape(title)
    )
}

fn device_selector(selected: &str, devices: &[String]) -> String {
    let options: String = devices
        .iter()
        .map(|id| {
            let sel = if id == selected { " selected" } else { "" };
            let id = html_escape(id);
            format!(r#"<option value="{id}"{sel}>{id}</option>"#)
        })
        .collect();

    format!(
        r#"<form class="inline" method="post" action="/device">
<label for="device-select">Device:</label>
<select id="device-select" name="device_id" onchange="this.form.submit()">{options}</select>
<noscript><button type="submit">Show</button></noscript>
</form>"#
    )
}

fn cards_html(latest: Option<&SensorRecord>) -> String {
    let cards: String = latest_cards(latest)
        .iter()
        .map(|c| {
            format!(
                r#"<div class="card"><h3>{}</h3><p class="value">{} {}</p></div>"#,
                c.title,
                html_escape(&c.value),
                c.unit
            )
        })
        .collect();
    format!(r#"<div class="cards">{cards}</div>"#)
}

fn export_html(state: &DashboardState) -> String {
    let export = &state.export;
    let disabled = if export.exporting { " disabled" } else { "" };
    let label = if export.exporting { "Exporting..." } else { "Download CSV" };
    let error = export
        .error
        .as_deref()
        .map(|e| format!(r#"<p class="error">{}</p>"#, html_escape(e)))
        .unwrap_or_default();

    format!(
        r#"<section id="export"><h3>CSV export</h3>
<form class="inline" method="post" action="/export">
<input type="text" name="device_id" value="{}" placeholder="Device ID">
<input type="datetime-local" name="start">
<span>~</span>
<input type="datetime-local" name="end">
<button type="submit"{disabled}>{label}</button>
</form>
{error}
</section>"#,
        html_escape(&export.device_id)
    )
}

fn images_html(state: &DashboardState) -> String {
    let body = if state.image_loading {
        "<p>Loading images...</p>".to_string()
    } else if state.images.is_empty() {
        "<p>No images to show.</p>".to_string()
    } else {
        let imgs: String = state
            .images
            .iter()
            .enumerate()
            .map(|(i, img)| {
                format!(
                    r#"<div><img src="{}" alt="Sensor image {}"></div>"#,
                    html_escape(&img.url),
                    i + 1
                )
            })
            .collect();
        format!(r#"<div class="images">{imgs}</div>"#)
    };
    format!("<section><h3>Latest camera images</h3>{body}</section>")
}

/// reload once the state moved past the rendered revision, unless the user
/// is filling a form
fn live_reload(revision: u64) -> String {
    format!(
        r#"<script>
(function () {{
  var seen = {revision};
  setInterval(function () {{
    fetch('/api/state').then(function (r) {{ return r.json(); }}).then(function (s) {{
      var busy = document.activeElement && document.activeElement.form;
      if (s.revision !== seen && !busy) {{ location.reload(); }}
    }}).catch(function () {{}});
  }}, 5000);
}})();
</script>"#
    )
}

pub fn render(state: &DashboardState, devices: &[String]) -> String {
    match state.phase {
        Phase::Initializing | Phase::Loading => page(
            "Loading",
            r#"<meta http-equiv="refresh" content="2">"#,
            "<h1>Loading...</h1>",
        ),
        Phase::Error => {
            let message = state.error.as_deref().unwrap_or("an unknown error occurred");
            page(
                "Error",
                &live_reload(state.revision),
                &format!(
                    r#"<h1>Error</h1>
<section><p class="error">{}</p>
{}
<form class="inline" method="post" action="/device">
<input type="hidden" name="device_id" value="{}">
<button type="submit">Retry</button>
</form></section>"#,
                    html_escape(message),
                    device_selector(&state.selected_device, devices),
                    html_escape(&state.selected_device)
                ),
            )
        }
        Phase::Ready => page(
            "Sensor data",
            &live_reload(state.revision),
            &dashboard_body(state, devices),
        ),
    }
}

fn dashboard_body(state: &DashboardState, devices: &[String]) -> String {
    let mut body = String::from("<h1>Sensor data</h1>\n");

    if let Some(error) = &state.error {
        let _ = write!(body, r#"<div class="banner">{}</div>"#, html_escape(error));
    }

    body.push_str(&device_selector(&state.selected_device, devices));
    body.push_str(&cards_html(state.latest()));

    let charts = [
        (
            "Temperature / humidity",
            temperature_humidity_points(&state.records),
            ("Temperature (°C)", "#8884d8"),
            ("Humidity (%)", "#82ca9d"),
        ),
        (
            "Light",
            light_points(&state.records),
            ("External light (lx)", "#ffc658"),
            ("Internal light (lx)", "#ff7300"),
        ),
        (
            "Plant growth",
            plant_points(&state.records),
            ("Stem", "#2e86de"),
            ("Fruit diagram", "#e84393"),
        ),
    ];
    for (title, points, primary, secondary) in charts {
        let _ = write!(
            body,
            "<section><h3>{title}</h3>{}</section>",
            svg_chart(&points, primary, secondary)
        );
    }

    body.push_str(&export_html(state));
    body.push_str(&images_html(state));
    body.push_str(
        r#"<div class="actions"><form method="post" action="/refresh"><button type="submit">Fetch latest</button></form></div>"#,
    );
    body
}
