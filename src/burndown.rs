//! Sprint burndown chart for the repository's active GitHub milestone.
//!
//! Reads milestones and issues from the GitHub REST API, derives story
//! points from `points:<N>` labels, and renders an SVG chart with an ideal
//! line and the actual remaining points per day.
//!
//! ```bash
//! GITHUB_TOKEN=... chat-rag burndown --repo owner/repo
//! ```
//!
//! Two files are written to the output directory:
//! `<milestone_title>_burndown.svg` and `latest_burndown.svg`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use plotters::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::BurndownConfig;

const PER_PAGE: usize = 100;
const POINTS_PREFIX: &str = "points:";

#[derive(Debug, Clone, Deserialize)]
pub struct Milestone {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub due_on: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Minimal read-only GitHub REST client.
pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chat-rag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        page: usize,
    ) -> Result<Vec<T>> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .query(query)
            .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("GitHub request failed: {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, url, body);
        }

        resp.json::<Vec<T>>()
            .await
            .with_context(|| format!("Invalid GitHub response from {}", url))
    }

    async fn get_all<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let batch: Vec<T> = self.get_page(path, query, page).await?;
            let done = batch.len() < PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    pub async fn open_milestones(&self, repo: &str) -> Result<Vec<Milestone>> {
        self.get_all(
            &format!("/repos/{}/milestones", repo),
            &[("state", "open".to_string())],
        )
        .await
    }

    /// All issues (open and closed) assigned to `milestone`.
    pub async fn milestone_issues(&self, repo: &str, milestone: u64) -> Result<Vec<Issue>> {
        self.get_all(
            &format!("/repos/{}/issues", repo),
            &[
                ("milestone", milestone.to_string()),
                ("state", "all".to_string()),
            ],
        )
        .await
    }
}

/// The open milestone due soonest. Milestones without a due date are ignored.
pub fn select_active_milestone(milestones: Vec<Milestone>) -> Option<Milestone> {
    milestones
        .into_iter()
        .filter(|m| m.due_on.is_some())
        .min_by_key(|m| m.due_on)
}

/// Points from the first `points:<N>` label, or 0.
pub fn story_points(issue: &Issue) -> u64 {
    issue
        .labels
        .iter()
        .find_map(|label| {
            let digits = label.name.strip_prefix(POINTS_PREFIX)?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()
        })
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BurndownSeries {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// One entry per day, `start..=end`.
    pub dates: Vec<NaiveDate>,
    pub ideal: Vec<f64>,
    pub actual: Vec<u64>,
    pub total_points: u64,
}

pub fn compute_burndown(milestone: &Milestone, issues: &[Issue]) -> Result<BurndownSeries> {
    let due_on = milestone
        .due_on
        .with_context(|| format!("milestone '{}' has no due date", milestone.title))?;
    let start = milestone.created_at.date_naive();
    let end = due_on.date_naive();
    if end < start {
        bail!(
            "milestone '{}' is due ({}) before it was created ({})",
            milestone.title,
            end,
            start
        );
    }

    let total_points = issues
        .iter()
        .map(story_points)
        .fold(0u64, u64::saturating_add);

    let mut closed_by_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for issue in issues {
        if let Some(closed_at) = issue.closed_at {
            let points = closed_by_day.entry(closed_at.date_naive()).or_insert(0);
            *points = points.saturating_add(story_points(issue));
        }
    }

    let days = (end - start).num_days() as usize + 1;
    let dates: Vec<NaiveDate> = (0..days)
        .map(|i| start + Duration::days(i as i64))
        .collect();

    let ideal = (0..days)
        .map(|i| {
            if days == 1 {
                total_points as f64
            } else {
                total_points as f64 * (1.0 - i as f64 / (days - 1) as f64)
            }
        })
        .collect();

    // Only closures inside the milestone window burn points.
    let actual = dates
        .iter()
        .map(|day| {
            let burned = closed_by_day
                .range(start..=*day)
                .map(|(_, p)| *p)
                .fold(0u64, u64::saturating_add);
            total_points.saturating_sub(burned)
        })
        .collect();

    Ok(BurndownSeries {
        start,
        end,
        dates,
        ideal,
        actual,
        total_points,
    })
}

/// `Sprint 3` → `Sprint_3_burndown.svg`.
pub fn chart_file_name(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c == ' ' || c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}_burndown.svg", stem)
}

/// Draw the chart to `path`. The actual line stops at `today`.
pub fn render_chart(series: &BurndownSeries, title: &str, path: &Path, today: NaiveDate) -> Result<()> {
    let last_day = (series.dates.len().max(1) - 1) as i64;
    let y_max = (series.total_points.max(1) as f64) * 1.1;
    let start = series.start;
    let today_offset = (today - start).num_days();

    let root = SVGBackend::new(path, (1200, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Burndown Chart - {}", title), ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0i64..last_day.max(1), 0f64..y_max)?;

    let date_label = |d: &i64| (start + Duration::days(*d)).format("%Y-%m-%d").to_string();
    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc("Story Points Remaining")
        .x_labels(series.dates.len().clamp(2, 12))
        .x_label_formatter(&date_label)
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            series.ideal.iter().enumerate().map(|(i, v)| (i as i64, *v)),
            BLUE.stroke_width(2),
        ))?
        .label("Ideal Burndown")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            series
                .actual
                .iter()
                .enumerate()
                .map(|(i, v)| (i as i64, *v as f64))
                .take_while(|(i, _)| *i <= today_offset),
            RED.stroke_width(2),
        ))?
        .label("Actual Burndown")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    if today >= series.start && today <= series.end {
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(today_offset, 0.0), (today_offset, y_max)],
                GREEN.mix(0.3).stroke_width(2),
            )))?
            .label("Today")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN.mix(0.3)));
    }

    let font = ("sans-serif", 14).into_font();
    chart.draw_series(std::iter::once(
        EmptyElement::at((0i64, series.total_points as f64))
            + Text::new(
                format!("Start: {} points", series.total_points),
                (10, 10),
                font.clone(),
            ),
    ))?;
    chart.draw_series(std::iter::once(
        EmptyElement::at((last_day, 0.0)) + Text::new("Goal: 0 points", (-110, -20), font),
    ))?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()
        .with_context(|| format!("Failed to write chart: {}", path.display()))?;
    Ok(())
}

/// Fetch, compute, and render. Returns the milestone chart path, or `None`
/// when the repository has no open milestone with a due date.
pub async fn generate(
    client: &GithubClient,
    repo: &str,
    output_dir: &Path,
    today: NaiveDate,
) -> Result<Option<PathBuf>> {
    let milestones = client.open_milestones(repo).await?;
    let Some(milestone) = select_active_milestone(milestones) else {
        return Ok(None);
    };

    println!("Generating burndown chart for milestone: {}", milestone.title);

    let issues = client.milestone_issues(repo, milestone.number).await?;
    let series = compute_burndown(&milestone, &issues)?;
    tracing::info!(
        milestone = %milestone.title,
        issues = issues.len(),
        total_points = series.total_points,
        "computed burndown"
    );

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir: {}", output_dir.display()))?;

    let chart_path = output_dir.join(chart_file_name(&milestone.title));
    render_chart(&series, &milestone.title, &chart_path, today)?;
    println!("Burndown chart saved to {}", chart_path.display());

    let latest = output_dir.join("latest_burndown.svg");
    std::fs::copy(&chart_path, &latest)
        .with_context(|| format!("Failed to write {}", latest.display()))?;
    println!("Latest burndown chart saved to {}", latest.display());

    Ok(Some(chart_path))
}

/// CLI entry point for `chat-rag burndown`.
pub async fn run_burndown(
    config: &BurndownConfig,
    repo: Option<String>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let repo = repo
        .or_else(|| config.repository.clone())
        .or_else(|| std::env::var("GITHUB_REPOSITORY").ok())
        .context("No repository configured: pass --repo, set [burndown].repository, or GITHUB_REPOSITORY")?;
    let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
    let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());

    let client = GithubClient::new(&config.api_url, token)?;
    match generate(&client, &repo, &output_dir, Utc::now().date_naive()).await? {
        Some(_) => println!("Burndown chart generation complete"),
        None => println!("No active milestone found"),
    }
    Ok(())
}
