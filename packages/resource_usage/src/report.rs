//! Test items, per-stage reports and the end-of-run resource usage summary.

use std::fmt;
use std::io::{self, Write};

use crate::Marker;

/// Category of the report sections that carry resource usage.
pub const RESOURCE_CATEGORY: &str = "resource";

/// Default terminal width used by [`TerminalWriter`].
pub const DEFAULT_WIDTH: usize = 80;

/// Title of the summary section.
const SUMMARY_TITLE: &str = "resource usage";

const BOLD: &str = "\u{1b}[1m";
const RESET: &str = "\u{1b}[0m";

/// The phases every test goes through.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(
    clippy::exhaustive_enums,
    reason = "the three phases of a test are fixed by the hosts we integrate with"
)]
pub enum Stage {
    /// Preparation of fixtures and other prerequisites.
    Setup,

    /// The test body itself.
    Call,

    /// Release of whatever setup prepared.
    Teardown,
}

impl Stage {
    /// The lowercase name of the stage, as shown in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Call => "call",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage of a test ended.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Outcome {
    /// The stage completed without failure.
    Passed,

    /// The stage failed.
    Failed,

    /// The test was skipped during this stage.
    Skipped,
}

impl Outcome {
    /// The lowercase name of the outcome, as shown in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of extra information attached to a test for one of its stages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Annotation {
    stage: Stage,
    category: String,
    text: String,
}

impl Annotation {
    /// Creates an annotation.
    #[must_use]
    pub fn new(stage: Stage, category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            stage,
            category: category.into(),
            text: text.into(),
        }
    }

    /// The stage the annotation belongs to.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// What kind of information the annotation carries, e.g. [`RESOURCE_CATEGORY`].
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The information itself.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A test as seen by the host: its identity, its markers and what was reported about it.
///
/// # Examples
///
/// ```
/// use resource_usage::{Marker, Stage, TestItem};
///
/// let mut item = TestItem::new("tests/test_io.rs::reads")
///     .marker(Marker::report_uss().kwarg("interval", "0.01"))
///     .marker(Marker::report_duration());
///
/// assert!(item.has_marker("report_uss"));
///
/// item.add_report_section(Stage::Call, "resource", "running time: 0.001 seconds");
/// assert_eq!(item.annotations().len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct TestItem {
    node_id: String,
    markers: Vec<Marker>,
    annotations: Vec<Annotation>,
}

impl TestItem {
    /// Creates an item without markers.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            markers: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Adds a marker. Markers are ordered closest-first, so add the markers of the test
    /// itself before those inherited from its module or session.
    #[must_use]
    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// The identifier of the test, unique within a run.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// All markers of the test, closest first.
    #[must_use]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Whether any marker with the given name is attached.
    #[must_use]
    pub fn has_marker(&self, name: &str) -> bool {
        self.markers.iter().any(|m| m.name() == name)
    }

    /// The markers with the given name, closest first.
    pub fn iter_markers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Marker> {
        self.markers.iter().filter(move |m| m.name() == name)
    }

    /// Attaches information to the reports of one stage of the test.
    pub fn add_report_section(
        &mut self,
        stage: Stage,
        category: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.annotations.push(Annotation::new(stage, category, text));
    }

    /// Everything attached with [`add_report_section()`][Self::add_report_section], in order.
    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

/// The report of one stage of one test.
#[derive(Clone, Debug)]
pub struct TestReport {
    node_id: String,
    stage: Stage,
    outcome: Outcome,
    annotations: Vec<Annotation>,
}

impl TestReport {
    /// Creates the report of a stage of `item`, including everything attached to the item so
    /// far.
    #[must_use]
    pub fn from_item(item: &TestItem, stage: Stage, outcome: Outcome) -> Self {
        Self {
            node_id: item.node_id.clone(),
            stage,
            outcome,
            annotations: item.annotations.clone(),
        }
    }

    /// The identifier of the test.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The stage this report covers.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// How the stage ended.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Texts of the annotations of a category that belong to this report's stage.
    pub fn sections<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a str> {
        self.annotations
            .iter()
            .filter(move |a| a.stage == self.stage && a.category == category)
            .map(Annotation::text)
    }

    /// The resource usage of this stage as one line, empty if none was reported.
    #[must_use]
    pub fn resource_message(&self) -> String {
        self.sections(RESOURCE_CATEGORY)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Every report of a test run, grouped by outcome.
///
/// Outcome groups keep the order in which their first report arrived; reports keep the order
/// in which they were recorded.
#[derive(Clone, Debug, Default)]
pub struct RunLog {
    groups: Vec<(Outcome, Vec<TestReport>)>,
}

impl RunLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a report to the group of its outcome.
    pub fn record(&mut self, report: TestReport) {
        if let Some((_, reports)) = self
            .groups
            .iter_mut()
            .find(|(outcome, _)| *outcome == report.outcome)
        {
            reports.push(report);
        } else {
            self.groups.push((report.outcome, vec![report]));
        }
    }

    /// All reports, group by group.
    pub fn reports(&self) -> impl Iterator<Item = &TestReport> {
        self.groups.iter().flat_map(|(_, reports)| reports)
    }

    /// The reports with the given outcome.
    #[must_use]
    pub fn reports_with(&self, outcome: Outcome) -> &[TestReport] {
        self.groups
            .iter()
            .find(|(o, _)| *o == outcome)
            .map_or(&[], |(_, reports)| reports.as_slice())
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Where the host prints its end-of-run summary.
pub trait SummaryWriter {
    /// Writes a separator line made of `sep` characters with `title` in the middle.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying output.
    fn write_sep(&mut self, sep: char, title: &str, bold: bool) -> io::Result<()>;

    /// Writes one line of text.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying output.
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// The resource usage section of the end-of-run summary.
///
/// Contains one line per report that carries resource usage, across all outcomes and stages.
///
/// # Examples
///
/// ```
/// use resource_usage::{Outcome, ResourceSummary, RunLog, Stage, TestItem, TestReport};
///
/// let mut item = TestItem::new("test_a");
/// item.add_report_section(Stage::Call, "resource", "running time: 1.000 seconds");
///
/// let mut log = RunLog::new();
/// log.record(TestReport::from_item(&item, Stage::Call, Outcome::Passed));
///
/// let summary = ResourceSummary::from_log(&log);
/// assert_eq!(summary.lines(), ["test_a (call) running time: 1.000 seconds"]);
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceSummary {
    lines: Vec<String>,
}

impl ResourceSummary {
    /// Collects the resource usage of every report in the log.
    #[must_use]
    pub fn from_log(log: &RunLog) -> Self {
        let lines = log
            .reports()
            .filter_map(|report| {
                let message = report.resource_message();

                (!message.is_empty())
                    .then(|| format!("{} ({}) {message}", report.node_id(), report.stage()))
            })
            .collect();

        Self { lines }
    }

    /// Whether no report carried resource usage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The summary lines, without the section header.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Writes the section, or nothing at all if it is empty.
    ///
    /// # Errors
    ///
    /// Returns the error of the writer.
    pub fn write_to(&self, writer: &mut (impl SummaryWriter + ?Sized)) -> io::Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        writer.write_sep('=', SUMMARY_TITLE, true)?;

        for line in &self.lines {
            writer.write_line(line)?;
        }

        Ok(())
    }
}

impl fmt::Display for ResourceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }

        Ok(())
    }
}

/// Writes summaries to a terminal or any other byte sink.
///
/// Separator lines span the configured width, with the title centered between two runs of
/// separator characters. With markup enabled, bold text uses ANSI escape codes.
///
/// # Examples
///
/// ```
/// use resource_usage::{SummaryWriter, TerminalWriter};
///
/// let mut writer = TerminalWriter::new(Vec::new()).width(20);
/// writer.write_sep('=', "usage", false).unwrap();
///
/// assert_eq!(writer.into_inner(), b"====== usage =======\n");
/// ```
#[derive(Debug)]
pub struct TerminalWriter<W: Write> {
    out: W,
    width: usize,
    markup: bool,
}

impl<W: Write> TerminalWriter<W> {
    /// Creates a writer with the default width and no markup.
    #[must_use]
    pub const fn new(out: W) -> Self {
        Self {
            out,
            width: DEFAULT_WIDTH,
            markup: false,
        }
    }

    /// Sets the width that separator lines span.
    #[must_use]
    pub const fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Sets whether bold text is rendered with ANSI escape codes.
    #[must_use]
    pub const fn markup(mut self, markup: bool) -> Self {
        self.markup = markup;
        self
    }

    /// Returns the underlying output.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> SummaryWriter for TerminalWriter<W> {
    fn write_sep(&mut self, sep: char, title: &str, bold: bool) -> io::Result<()> {
        let line = separator_line(sep, title, self.width);

        if bold && self.markup {
            writeln!(self.out, "{BOLD}{line}{RESET}")
        } else {
            writeln!(self.out, "{line}")
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{line}")
    }
}

/// Builds a separator line of `width` characters with `title` in the middle.
///
/// The title keeps at least one separator character on each side, even if that makes the
/// line wider than requested.
#[expect(
    clippy::integer_division,
    reason = "an odd remainder is filled up at the end of the line"
)]
fn separator_line(sep: char, title: &str, width: usize) -> String {
    let sep = sep.to_string();

    if title.is_empty() {
        return sep.repeat(width);
    }

    // The title is padded with one space on each side.
    let title_width = title.chars().count().saturating_add(2);
    let fill = sep.repeat((width.saturating_sub(title_width) / 2).max(1));

    let mut line = format!("{fill} {title} {fill}");

    if line.chars().count() < width {
        line.push_str(&sep);
    }

    line
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Write as _;

    use super::*;

    static_assertions::assert_impl_all!(TestItem: Send, Sync, Clone);
    static_assertions::assert_impl_all!(RunLog: Send, Sync);

    /// Records every call, to observe exactly what a summary writes.
    #[derive(Debug, Default)]
    struct RecordingWriter {
        output: String,
    }

    impl SummaryWriter for RecordingWriter {
        fn write_sep(&mut self, sep: char, title: &str, bold: bool) -> io::Result<()> {
            writeln!(self.output, "sep({sep}, {title}, bold={bold})").unwrap();
            Ok(())
        }

        fn write_line(&mut self, line: &str) -> io::Result<()> {
            writeln!(self.output, "line({line})").unwrap();
            Ok(())
        }
    }

    fn report(item: &TestItem, stage: Stage, outcome: Outcome) -> TestReport {
        TestReport::from_item(item, stage, outcome)
    }

    #[test]
    fn markers_are_found_by_name_closest_first() {
        let item = TestItem::new("t")
            .marker(Marker::report_uss().kwarg("interval", "1"))
            .marker(Marker::report_duration())
            .marker(Marker::report_uss().kwarg("interval", "2"));

        let intervals = item
            .iter_markers("report_uss")
            .map(|m| m.get("interval").unwrap())
            .collect::<Vec<_>>();

        assert_eq!(intervals, ["1", "2"]);
        assert!(item.has_marker("report_duration"));
        assert!(!item.has_marker("report_tracemalloc"));
        assert_eq!(item.markers().len(), 3);
    }

    #[test]
    fn resource_message_joins_sections_of_own_stage() {
        let mut item = TestItem::new("t");
        item.add_report_section(Stage::Setup, RESOURCE_CATEGORY, "setup only");
        item.add_report_section(Stage::Call, RESOURCE_CATEGORY, "first");
        item.add_report_section(Stage::Call, "stdout", "captured output");
        item.add_report_section(Stage::Call, RESOURCE_CATEGORY, "second");

        assert_eq!(
            report(&item, Stage::Call, Outcome::Passed).resource_message(),
            "first, second"
        );
        assert_eq!(
            report(&item, Stage::Setup, Outcome::Passed).resource_message(),
            "setup only"
        );
        assert_eq!(
            report(&item, Stage::Teardown, Outcome::Passed).resource_message(),
            ""
        );
    }

    #[test]
    fn run_log_groups_by_outcome_in_first_seen_order() {
        let mut log = RunLog::new();
        assert!(log.is_empty());

        log.record(report(&TestItem::new("a"), Stage::Call, Outcome::Failed));
        log.record(report(&TestItem::new("b"), Stage::Call, Outcome::Passed));
        log.record(report(&TestItem::new("c"), Stage::Call, Outcome::Failed));

        let order = log.reports().map(TestReport::node_id).collect::<Vec<_>>();

        assert_eq!(order, ["a", "c", "b"]);
        assert_eq!(log.reports_with(Outcome::Failed).len(), 2);
        assert!(log.reports_with(Outcome::Skipped).is_empty());
    }

    #[test]
    fn summary_covers_all_outcomes_and_stages() {
        let mut passed = TestItem::new("tests/a.rs::passes");
        passed.add_report_section(
            Stage::Call,
            RESOURCE_CATEGORY,
            "running time: 1.000 seconds",
        );
        passed.add_report_section(Stage::Call, RESOURCE_CATEGORY, "peak allocated memory: 2MB");

        let mut failed = TestItem::new("tests/a.rs::fails");
        failed.add_report_section(Stage::Call, RESOURCE_CATEGORY, "peak unique set size: 3kB");

        let quiet = TestItem::new("tests/a.rs::quiet");

        let mut log = RunLog::new();
        log.record(report(&passed, Stage::Setup, Outcome::Passed));
        log.record(report(&passed, Stage::Call, Outcome::Passed));
        log.record(report(&quiet, Stage::Call, Outcome::Passed));
        log.record(report(&failed, Stage::Call, Outcome::Failed));
        log.record(report(&passed, Stage::Teardown, Outcome::Passed));

        let summary = ResourceSummary::from_log(&log);

        assert_eq!(
            summary.lines(),
            [
                "tests/a.rs::passes (call) running time: 1.000 seconds, peak allocated memory: 2MB",
                "tests/a.rs::fails (call) peak unique set size: 3kB",
            ]
        );
    }

    #[test]
    fn empty_summary_writes_nothing() {
        let mut log = RunLog::new();
        log.record(report(&TestItem::new("t"), Stage::Call, Outcome::Passed));

        let summary = ResourceSummary::from_log(&log);
        let mut writer = RecordingWriter::default();
        summary.write_to(&mut writer).unwrap();

        assert!(summary.is_empty());
        assert_eq!(writer.output, "");
    }

    #[test]
    fn summary_writes_bold_header_then_lines() {
        let mut item = TestItem::new("t");
        item.add_report_section(
            Stage::Call,
            RESOURCE_CATEGORY,
            "running time: 0.500 seconds",
        );

        let mut log = RunLog::new();
        log.record(report(&item, Stage::Call, Outcome::Passed));

        let summary = ResourceSummary::from_log(&log);
        let mut writer = RecordingWriter::default();
        summary.write_to(&mut writer).unwrap();

        assert_eq!(
            writer.output,
            "sep(=, resource usage, bold=true)\nline(t (call) running time: 0.500 seconds)\n"
        );
    }

    #[test]
    fn summary_display_lists_lines() {
        let mut item = TestItem::new("t");
        item.add_report_section(Stage::Call, RESOURCE_CATEGORY, "x");

        let mut log = RunLog::new();
        log.record(report(&item, Stage::Call, Outcome::Passed));

        assert_eq!(ResourceSummary::from_log(&log).to_string(), "t (call) x\n");
    }

    #[test]
    fn separator_spans_width() {
        let even = separator_line('=', "resource usage", 80);
        let odd = separator_line('=', "odd title", 80);

        assert_eq!(even.chars().count(), 80);
        assert_eq!(odd.chars().count(), 80);
        assert!(even.starts_with("================================ resource usage "));
        // The odd remainder goes to the end of the line.
        assert_eq!(
            odd,
            format!("{} odd title {}", "=".repeat(34), "=".repeat(35))
        );
    }

    #[test]
    fn separator_keeps_fill_around_long_title() {
        assert_eq!(separator_line('-', "much too long", 5), "- much too long -");
    }

    #[test]
    fn separator_without_title_is_plain() {
        assert_eq!(separator_line('-', "", 4), "----");
    }

    #[test]
    fn terminal_writer_renders_bold_only_with_markup() {
        let mut plain = TerminalWriter::new(Vec::new()).width(12);
        plain.write_sep('=', "x", true).unwrap();
        plain.write_line("body").unwrap();

        let mut fancy = TerminalWriter::new(Vec::new()).width(12).markup(true);
        fancy.write_sep('=', "x", true).unwrap();

        assert_eq!(
            String::from_utf8(plain.into_inner()).unwrap(),
            "==== x =====\nbody\n"
        );
        assert_eq!(
            String::from_utf8(fancy.into_inner()).unwrap(),
            "\u{1b}[1m==== x =====\u{1b}[0m\n"
        );
    }

    #[test]
    fn display_names_are_lowercase() {
        assert_eq!(Stage::Teardown.to_string(), "teardown");
        assert_eq!(Outcome::Skipped.to_string(), "skipped");
    }
}
