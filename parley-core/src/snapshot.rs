//! Display snapshot and minimal change-sets.
//!
//! A [`Snapshot`] turns the flat message list of a conversation into
//! day-bucketed sections, plus the pseudo sections for the welcome text
//! (`Info`), backward pagination (`Loading`) and the agent typing indicator
//! (`Typing`).
//!
//! Every command consumes the snapshot and returns its successor together
//! with the [`Change`] that moves a display from the old value to the new
//! one. Deleted and reloaded indices refer to the old snapshot, inserted
//! indices to the new one. Consumers apply section operations before row
//! operations, in delete → insert → reload order.
//!
//! Invariants: at most one `Typing` section and it is always last, at most
//! one `Loading` section, at most one `Info` section.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};
use parley_types::Message;

/// Maps instants to calendar days and knows which day is today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
    today: NaiveDate,
}

impl Calendar {
    /// The local timezone, as of now.
    pub fn local() -> Self {
        let now = Local::now();
        Self {
            offset: *now.offset(),
            today: now.date_naive(),
        }
    }

    /// A fixed offset and day, for deterministic use.
    pub fn fixed(offset: FixedOffset, today: NaiveDate) -> Self {
        Self { offset, today }
    }

    /// The day containing `time`.
    pub fn day_of(&self, time: DateTime<Utc>) -> NaiveDate {
        time.with_timezone(&self.offset).date_naive()
    }

    /// Today.
    pub fn today(&self) -> NaiveDate {
        self.today
    }
}

/// Position of a row within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexPath {
    /// Section index.
    pub section: usize,
    /// Row index within the section.
    pub row: usize,
}

impl IndexPath {
    /// Create an index path.
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

/// Insert/delete/reload/move operations on one level (sections or rows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<T: Ord> {
    /// Removed, at old indices.
    pub deleted: BTreeSet<T>,
    /// Added, at new indices.
    pub inserted: BTreeSet<T>,
    /// Redrawn in place, at old indices.
    pub reloaded: BTreeSet<T>,
    /// Moved from an old to a new index. Not produced by the current rules.
    pub moved: Vec<(T, T)>,
}

impl<T: Ord> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            deleted: BTreeSet::new(),
            inserted: BTreeSet::new(),
            reloaded: BTreeSet::new(),
            moved: Vec::new(),
        }
    }
}

impl<T: Ord> ChangeSet<T> {
    /// Whether nothing changed on this level.
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.inserted.is_empty()
            && self.reloaded.is_empty()
            && self.moved.is_empty()
    }
}

/// The difference between two consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Change {
    /// Section-level operations.
    pub sections: ChangeSet<usize>,
    /// Row-level operations.
    pub rows: ChangeSet<IndexPath>,
}

impl Change {
    /// Whether the change does nothing.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.rows.is_empty()
    }

    fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// What a section shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    /// Welcome text
    Info,
    /// Older messages are being fetched
    Loading,
    /// Messages of one day, with the day header when shown
    Messages {
        /// The header, hidden when `None`
        date_header: Option<NaiveDate>,
    },
    /// The agent is typing
    Typing,
}

/// One displayable cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Welcome text
    Info(String),
    /// Pagination spinner
    Loading,
    /// A plain message
    Message(Message),
    /// A message with nested carousel items
    Carousel {
        /// The carrying message
        main: Message,
        /// Its carousel items
        children: Vec<Message>,
    },
    /// Agent typing indicator
    Typing,
}

impl Cell {
    fn for_message(message: &Message) -> Self {
        if message.carousel.is_empty() {
            Cell::Message(message.clone())
        } else {
            Cell::Carousel {
                main: message.clone(),
                children: message.carousel.clone(),
            }
        }
    }

    /// The message behind this cell, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Cell::Message(message) | Cell::Carousel { main: message, .. } => Some(message),
            _ => None,
        }
    }
}

/// A group of cells under an optional date header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Day this section belongs to. Also set on an `Info` section that
    /// serves as the header of today's messages.
    pub date: Option<NaiveDate>,
    /// What the section shows.
    pub kind: SectionKind,
    /// The rows.
    pub cells: Vec<Cell>,
}

impl Section {
    fn info(text: String, date: Option<NaiveDate>) -> Self {
        Self {
            date,
            kind: SectionKind::Info,
            cells: vec![Cell::Info(text)],
        }
    }

    fn loading() -> Self {
        Self {
            date: None,
            kind: SectionKind::Loading,
            cells: vec![Cell::Loading],
        }
    }

    fn typing() -> Self {
        Self {
            date: None,
            kind: SectionKind::Typing,
            cells: vec![Cell::Typing],
        }
    }

    fn messages(day: NaiveDate, show_header: bool, cell: Cell) -> Self {
        Self {
            date: Some(day),
            kind: SectionKind::Messages {
                date_header: show_header.then_some(day),
            },
            cells: vec![cell],
        }
    }

    fn is_messages_for(&self, day: NaiveDate) -> bool {
        matches!(self.kind, SectionKind::Messages { .. }) && self.date == Some(day)
    }

    fn set_header_visible(&mut self, visible: bool) -> bool {
        if let SectionKind::Messages { date_header } = &mut self.kind {
            let wanted = if visible { self.date } else { None };
            if *date_header != wanted {
                *date_header = wanted;
                return true;
            }
        }
        false
    }
}

/// The display-ready projection of a conversation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    sections: Vec<Section>,
    welcome_message: Option<String>,
    loading: bool,
    agent_typing: bool,
    adaptive: bool,
    calendar: Calendar,
}

impl Snapshot {
    /// Create an empty snapshot.
    ///
    /// With `adaptive` set the welcome section sits above today's messages
    /// instead of being pinned to the top.
    pub fn new(calendar: Calendar, adaptive: bool) -> Self {
        Self {
            sections: Vec::new(),
            welcome_message: None,
            loading: false,
            agent_typing: false,
            adaptive,
            calendar,
        }
    }

    /// Build a snapshot for a freshly attached display.
    pub fn from_messages<'a>(
        messages: impl IntoIterator<Item = &'a Message>,
        welcome_message: Option<String>,
        calendar: Calendar,
        adaptive: bool,
    ) -> Self {
        let (mut snapshot, _) = Self::new(calendar, adaptive).set_welcome(welcome_message);
        for message in messages {
            snapshot = snapshot.insert(message).0;
        }
        snapshot
    }

    /// The sections in display order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Current welcome text.
    pub fn welcome_message(&self) -> Option<&str> {
        self.welcome_message.as_deref()
    }

    /// Whether the loading section is shown.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Whether the typing section is shown.
    pub fn is_agent_typing(&self) -> bool {
        self.agent_typing
    }

    /// Whether the welcome section follows today's messages.
    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// The calendar used for day bucketing.
    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    /// Number of message cells.
    pub fn message_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| s.cells.iter())
            .filter(|c| c.message().is_some())
            .count()
    }

    /// Locate the cell of a message.
    pub fn index_of(&self, message: &Message) -> Option<IndexPath> {
        let day = self.calendar.day_of(message.time);
        let preferred = self.sections.iter().position(|s| s.is_messages_for(day));
        let candidates = preferred.into_iter().chain(0..self.sections.len());
        for section in candidates {
            if let Some(row) = self.sections[section]
                .cells
                .iter()
                .position(|c| c.message().is_some_and(|m| m.same_identity(message)))
            {
                return Some(IndexPath::new(section, row));
            }
        }
        None
    }

    /// Insert a message cell.
    ///
    /// Messages that are ignored, that only carry quick replies, or that are
    /// already present produce no change.
    pub fn insert(mut self, message: &Message) -> (Self, Option<Change>) {
        if !message.is_displayable() || self.index_of(message).is_some() {
            return (self, None);
        }

        let mut change = Change::default();
        let day = self.calendar.day_of(message.time);

        if let Some(section) = self.sections.iter().position(|s| s.is_messages_for(day)) {
            let cells = &mut self.sections[section].cells;
            let row = cells
                .iter()
                .position(|c| c.message().is_some_and(|m| m.time > message.time))
                .unwrap_or(cells.len());
            cells.insert(row, Cell::for_message(message));
            change.rows.inserted.insert(IndexPath::new(section, row));
            return (self, change.into_option());
        }

        let today = self.calendar.today();
        let info = self.info_index();
        let header_on_info = self.adaptive && day == today && info.is_some();

        let index = self.messages_section_index(day);
        self.sections.insert(
            index,
            Section::messages(day, !header_on_info, Cell::for_message(message)),
        );
        change.sections.inserted.insert(index);
        change.rows.inserted.insert(IndexPath::new(index, 0));

        if let (true, Some(info)) = (header_on_info, info) {
            // Today's section lands right after the info section, so its
            // index is unchanged by the insert.
            if self.sections[info].date != Some(today) {
                self.sections[info].date = Some(today);
                change.sections.reloaded.insert(info);
            }
        }

        (self, change.into_option())
    }

    /// Insert several messages, collecting one change per insert.
    pub fn insert_all<'a>(
        mut self,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> (Self, Vec<Change>) {
        let mut changes = Vec::new();
        for message in messages {
            let (next, change) = self.insert(message);
            self = next;
            changes.extend(change);
        }
        (self, changes)
    }

    /// Replace an existing message cell in place.
    pub fn update(mut self, message: &Message) -> (Self, Option<Change>) {
        let Some(path) = self.index_of(message) else {
            return (self, None);
        };
        self.sections[path.section].cells[path.row] = Cell::for_message(message);
        let mut change = Change::default();
        change.rows.reloaded.insert(path);
        (self, Some(change))
    }

    /// Show, change or remove the welcome text.
    pub fn set_welcome(mut self, text: Option<String>) -> (Self, Option<Change>) {
        let text = text.filter(|t| !t.is_empty());
        if text == self.welcome_message {
            return (self, None);
        }

        let mut change = Change::default();
        let today = self.calendar.today();

        match (self.info_index(), text.clone()) {
            (None, Some(text)) if self.adaptive => {
                let today_section = self.sections.iter().position(|s| s.is_messages_for(today));
                if let Some(section) = today_section {
                    if self.sections[section].set_header_visible(false) {
                        change.sections.reloaded.insert(section);
                    }
                    self.sections
                        .insert(section, Section::info(text, Some(today)));
                    change.sections.inserted.insert(section);
                } else {
                    let index = self.typing_index().unwrap_or(self.sections.len());
                    self.sections.insert(index, Section::info(text, None));
                    change.sections.inserted.insert(index);
                }
            }
            (None, Some(text)) => {
                self.sections.insert(0, Section::info(text, None));
                change.sections.inserted.insert(0);
            }
            (Some(info), Some(text)) => {
                self.sections[info].cells = vec![Cell::Info(text)];
                change.sections.reloaded.insert(info);
            }
            (Some(info), None) => {
                let removed = self.sections.remove(info);
                change.sections.deleted.insert(info);
                if removed.date.is_some() {
                    if let Some(section) =
                        self.sections.iter().position(|s| s.is_messages_for(today))
                    {
                        if self.sections[section].set_header_visible(true) {
                            // Old index: the info section sat in front of it
                            let old = if section >= info { section + 1 } else { section };
                            change.sections.reloaded.insert(old);
                        }
                    }
                }
            }
            (None, None) => {}
        }

        self.welcome_message = text;
        (self, change.into_option())
    }

    /// Show or hide the loading section.
    pub fn set_loading(mut self, loading: bool) -> (Self, Option<Change>) {
        if loading == self.loading {
            return (self, None);
        }
        self.loading = loading;

        let mut change = Change::default();
        if loading {
            let index = self.info_index().map_or(0, |info| info + 1);
            self.sections.insert(index, Section::loading());
            change.sections.inserted.insert(index);
        } else if let Some(index) = self.loading_index() {
            self.sections.remove(index);
            change.sections.deleted.insert(index);
        }
        (self, change.into_option())
    }

    /// Show or hide the agent typing section.
    pub fn set_agent_typing(mut self, typing: bool) -> (Self, Option<Change>) {
        if typing == self.agent_typing {
            return (self, None);
        }
        self.agent_typing = typing;

        let mut change = Change::default();
        if typing {
            change.sections.inserted.insert(self.sections.len());
            self.sections.push(Section::typing());
        } else if let Some(index) = self.typing_index() {
            self.sections.remove(index);
            change.sections.deleted.insert(index);
        }
        (self, change.into_option())
    }

    fn info_index(&self) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| s.kind == SectionKind::Info)
    }

    fn loading_index(&self) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| s.kind == SectionKind::Loading)
    }

    fn typing_index(&self) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| s.kind == SectionKind::Typing)
    }

    /// Ordering key of a section among dated sections.
    ///
    /// An adaptive info section orders as the head of today. Loading and a
    /// pinned info section keep the position they were placed at.
    fn order_key(&self, section: &Section) -> Option<(NaiveDate, u8)> {
        match section.kind {
            SectionKind::Messages { .. } => section.date.map(|d| (d, 1)),
            SectionKind::Info if self.adaptive => {
                Some((section.date.unwrap_or(self.calendar.today()), 0))
            }
            _ => None,
        }
    }

    fn messages_section_index(&self, day: NaiveDate) -> usize {
        let key = (day, 1);
        // Message sections never go above the loading section
        let start = self.loading_index().map_or(0, |loading| loading + 1);
        for (index, section) in self.sections.iter().enumerate().skip(start) {
            if section.kind == SectionKind::Typing {
                return index;
            }
            if self.order_key(section).is_some_and(|k| k > key) {
                return index;
            }
        }
        self.sections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use parley_types::MessageKind;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
    }

    fn calendar() -> Calendar {
        Calendar::fixed(FixedOffset::east_opt(0).unwrap(), today())
    }

    /// Noon of `days` relative to today, plus `secs`.
    fn time(days: i64, secs: i64) -> DateTime<Utc> {
        Utc.from_utc_datetime(&today().and_hms_opt(12, 0, 0).unwrap())
            + Duration::days(days)
            + Duration::seconds(secs)
    }

    fn message(days: i64, secs: i64) -> Message {
        Message::new(MessageKind::Agent)
            .with_time(time(days, secs))
            .with_body("hello")
    }

    fn adaptive() -> Snapshot {
        Snapshot::new(calendar(), true)
    }

    fn pinned() -> Snapshot {
        Snapshot::new(calendar(), false)
    }

    fn kinds(snapshot: &Snapshot) -> Vec<SectionKind> {
        snapshot.sections().iter().map(|s| s.kind.clone()).collect()
    }

    // ===========================================
    // Insert Tests
    // ===========================================

    #[test]
    fn first_message_creates_section_with_header() {
        let (snapshot, change) = adaptive().insert(&message(-1, 0));
        let change = change.unwrap();

        assert_eq!(
            kinds(&snapshot),
            vec![SectionKind::Messages {
                date_header: Some(today() - Duration::days(1))
            }]
        );
        assert_eq!(change.sections.inserted, BTreeSet::from([0]));
        assert_eq!(change.rows.inserted, BTreeSet::from([IndexPath::new(0, 0)]));
    }

    #[test]
    fn same_day_insert_is_a_row_insert_in_time_order() {
        let (snapshot, _) = adaptive().insert(&message(0, 0));
        let (snapshot, _) = snapshot.insert(&message(0, 100));
        let (snapshot, change) = snapshot.insert(&message(0, 50));
        let change = change.unwrap();

        assert!(change.sections.is_empty());
        assert_eq!(change.rows.inserted, BTreeSet::from([IndexPath::new(0, 1)]));
        let times: Vec<DateTime<Utc>> = snapshot.sections()[0]
            .cells
            .iter()
            .map(|c| c.message().unwrap().time)
            .collect();
        assert_eq!(times, vec![time(0, 0), time(0, 50), time(0, 100)]);
    }

    #[test]
    fn equal_times_keep_insertion_order() {
        let first = message(0, 0).with_body("first");
        let second = message(0, 0).with_body("second");
        let (snapshot, _) = adaptive().insert(&first);
        let (snapshot, change) = snapshot.insert(&second);

        assert_eq!(
            change.unwrap().rows.inserted,
            BTreeSet::from([IndexPath::new(0, 1)])
        );
        assert_eq!(snapshot.sections()[0].cells[1].message(), Some(&second));
    }

    #[test]
    fn sections_are_ordered_by_day() {
        let (snapshot, _) = adaptive().insert(&message(0, 0));
        let (snapshot, change) = snapshot.insert(&message(-3, 0));
        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([0]));

        let (snapshot, change) = snapshot.insert(&message(-1, 0));
        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([1]));

        let dates: Vec<Option<NaiveDate>> = snapshot.sections().iter().map(|s| s.date).collect();
        assert_eq!(
            dates,
            vec![
                Some(today() - Duration::days(3)),
                Some(today() - Duration::days(1)),
                Some(today())
            ]
        );
    }

    #[test]
    fn distinct_days_produce_minimal_changes() {
        let messages = vec![message(-10, 0), message(-6, 0), message(-2, 0), message(-8, 0)];
        let (snapshot, changes) = adaptive().insert_all(&messages);

        let section_inserts: usize = changes.iter().map(|c| c.sections.inserted.len()).sum();
        let row_inserts: usize = changes.iter().map(|c| c.rows.inserted.len()).sum();
        let reloads: usize = changes
            .iter()
            .map(|c| c.sections.reloaded.len() + c.rows.reloaded.len())
            .sum();

        assert_eq!(snapshot.sections().len(), 4);
        assert_eq!(section_inserts, 4);
        assert_eq!(row_inserts, 4);
        assert_eq!(reloads, 0);
    }

    #[test]
    fn ignored_and_quick_reply_only_messages_have_no_cells() {
        let auto = Message::new(MessageKind::Auto).with_time(time(0, 0));
        let mut replies = Message::new(MessageKind::Agent).with_time(time(0, 0));
        replies.quick_replies = vec!["Yes".into()];

        let (snapshot, change) = adaptive().insert(&auto);
        assert!(change.is_none());
        let (snapshot, change) = snapshot.insert(&replies);
        assert!(change.is_none());
        assert!(snapshot.sections().is_empty());
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let m = message(0, 0);
        let (snapshot, _) = adaptive().insert(&m);
        let (snapshot, change) = snapshot.insert(&m);
        assert!(change.is_none());
        assert_eq!(snapshot.message_count(), 1);
    }

    #[test]
    fn carousel_messages_become_carousel_cells() {
        let mut m = message(0, 0);
        m.carousel = vec![message(0, 0).with_body("card")];
        let (snapshot, _) = adaptive().insert(&m);
        assert!(matches!(
            &snapshot.sections()[0].cells[0],
            Cell::Carousel { children, .. } if children.len() == 1
        ));
    }

    #[test]
    fn new_sections_stay_above_typing() {
        let (snapshot, _) = adaptive().set_agent_typing(true);
        let (snapshot, change) = snapshot.insert(&message(0, 0));

        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([0]));
        assert_eq!(snapshot.sections().last().unwrap().kind, SectionKind::Typing);
    }

    // ===========================================
    // Welcome Tests
    // ===========================================

    #[test]
    fn welcome_then_todays_message_moves_header_to_info() {
        let (snapshot, change) = adaptive().set_welcome(Some("Hi".into()));
        assert_eq!(kinds(&snapshot), vec![SectionKind::Info]);
        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([0]));

        let (snapshot, change) = snapshot.insert(&message(0, 0));
        let change = change.unwrap();

        assert_eq!(
            kinds(&snapshot),
            vec![
                SectionKind::Info,
                SectionKind::Messages { date_header: None }
            ]
        );
        assert_eq!(snapshot.sections()[0].date, Some(today()));
        assert_eq!(change.sections.reloaded, BTreeSet::from([0]));
        assert_eq!(change.sections.inserted, BTreeSet::from([1]));
        assert_eq!(change.rows.inserted, BTreeSet::from([IndexPath::new(1, 0)]));
    }

    #[test]
    fn older_messages_go_above_adaptive_info() {
        let (snapshot, _) = adaptive().set_welcome(Some("Hi".into()));
        let (snapshot, change) = snapshot.insert(&message(-2, 0));

        let change = change.unwrap();
        assert_eq!(change.sections.inserted, BTreeSet::from([0]));
        assert!(change.sections.reloaded.is_empty());
        assert_eq!(snapshot.sections()[1].kind, SectionKind::Info);
    }

    #[test]
    fn adaptive_welcome_lands_on_todays_section() {
        let (snapshot, _) = adaptive().insert(&message(-1, 0));
        let (snapshot, _) = snapshot.insert(&message(0, 0));
        let (snapshot, change) = snapshot.set_welcome(Some("Hi".into()));
        let change = change.unwrap();

        assert_eq!(change.sections.inserted, BTreeSet::from([1]));
        assert_eq!(change.sections.reloaded, BTreeSet::from([1]));
        assert_eq!(snapshot.sections()[1].kind, SectionKind::Info);
        assert_eq!(
            snapshot.sections()[2].kind,
            SectionKind::Messages { date_header: None }
        );
    }

    #[test]
    fn adaptive_welcome_without_today_goes_above_typing() {
        let (snapshot, _) = adaptive().insert(&message(-1, 0));
        let (snapshot, _) = snapshot.set_agent_typing(true);
        let (snapshot, change) = snapshot.set_welcome(Some("Hi".into()));

        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([1]));
        assert_eq!(
            kinds(&snapshot)[1..],
            [SectionKind::Info, SectionKind::Typing]
        );
    }

    #[test]
    fn welcome_text_change_reloads_in_place() {
        let (snapshot, _) = adaptive().set_welcome(Some("Hi".into()));
        let (snapshot, change) = snapshot.set_welcome(Some("Hello".into()));

        assert_eq!(change.unwrap().sections.reloaded, BTreeSet::from([0]));
        assert_eq!(snapshot.sections()[0].cells, vec![Cell::Info("Hello".into())]);

        let (_, change) = snapshot.set_welcome(Some("Hello".into()));
        assert!(change.is_none());
    }

    #[test]
    fn clearing_welcome_restores_todays_header() {
        let (snapshot, _) = adaptive().set_welcome(Some("Hi".into()));
        let (snapshot, _) = snapshot.insert(&message(0, 0));
        let (snapshot, change) = snapshot.set_welcome(None);
        let change = change.unwrap();

        assert_eq!(change.sections.deleted, BTreeSet::from([0]));
        assert_eq!(change.sections.reloaded, BTreeSet::from([1]));
        assert_eq!(
            kinds(&snapshot),
            vec![SectionKind::Messages {
                date_header: Some(today())
            }]
        );
    }

    #[test]
    fn pinned_welcome_is_always_first_and_headers_show() {
        let (snapshot, _) = pinned().insert(&message(-1, 0));
        let (snapshot, change) = snapshot.set_welcome(Some("Hi".into()));
        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([0]));

        let (snapshot, change) = snapshot.insert(&message(0, 0));
        let change = change.unwrap();
        assert!(change.sections.reloaded.is_empty());
        assert_eq!(
            kinds(&snapshot),
            vec![
                SectionKind::Info,
                SectionKind::Messages {
                    date_header: Some(today() - Duration::days(1))
                },
                SectionKind::Messages {
                    date_header: Some(today())
                },
            ]
        );
    }

    // ===========================================
    // Loading / Typing Tests
    // ===========================================

    #[test]
    fn loading_is_idempotent() {
        let (snapshot, first) = adaptive().set_loading(true);
        let (snapshot, second) = snapshot.set_loading(true);

        assert_eq!(first.unwrap().sections.inserted, BTreeSet::from([0]));
        assert!(second.is_none());
        assert_eq!(kinds(&snapshot), vec![SectionKind::Loading]);

        let (snapshot, change) = snapshot.set_loading(false);
        assert_eq!(change.unwrap().sections.deleted, BTreeSet::from([0]));
        assert!(snapshot.sections().is_empty());
        assert!(snapshot.set_loading(false).1.is_none());
    }

    #[test]
    fn pinned_loading_goes_after_info() {
        let (snapshot, _) = pinned().set_welcome(Some("Hi".into()));
        let (snapshot, change) = snapshot.set_loading(true);

        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([1]));
        assert_eq!(kinds(&snapshot), vec![SectionKind::Info, SectionKind::Loading]);
    }

    #[test]
    fn older_sections_go_below_loading() {
        let (snapshot, _) = adaptive().insert(&message(0, 0));
        let (snapshot, _) = snapshot.set_loading(true);
        let (snapshot, change) = snapshot.insert(&message(-5, 0));

        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([1]));
        assert_eq!(snapshot.sections()[0].kind, SectionKind::Loading);
    }

    #[test]
    fn adaptive_loading_goes_after_info() {
        let (snapshot, _) = adaptive().set_welcome(Some("Hi".into()));
        let (snapshot, change) = snapshot.set_loading(true);

        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([1]));
        assert_eq!(kinds(&snapshot), vec![SectionKind::Info, SectionKind::Loading]);
    }

    #[test]
    fn older_sections_go_below_loading_after_info() {
        let (snapshot, _) = adaptive().insert(&message(0, 0));
        let (snapshot, _) = snapshot.set_welcome(Some("Hi".into()));
        let (snapshot, _) = snapshot.set_loading(true);
        let (snapshot, change) = snapshot.insert(&message(-5, 0));

        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([2]));
        assert_eq!(snapshot.sections()[0].kind, SectionKind::Info);
        assert_eq!(snapshot.sections()[1].kind, SectionKind::Loading);
    }

    #[test]
    fn typing_appends_and_removes() {
        let (snapshot, _) = adaptive().insert(&message(0, 0));
        let (snapshot, change) = snapshot.set_agent_typing(true);
        assert_eq!(change.unwrap().sections.inserted, BTreeSet::from([1]));
        assert!(snapshot.set_agent_typing(true).1.is_none());

        let (snapshot, _) = adaptive().insert(&message(0, 0));
        let (snapshot, _) = snapshot.set_agent_typing(true);
        let (snapshot, change) = snapshot.set_agent_typing(false);
        assert_eq!(change.unwrap().sections.deleted, BTreeSet::from([1]));
        assert_eq!(snapshot.sections().len(), 1);
    }

    // ===========================================
    // Update Tests
    // ===========================================

    #[test]
    fn update_reloads_the_row() {
        let m = message(0, 0);
        let (snapshot, _) = adaptive().insert(&message(0, -10));
        let (snapshot, _) = snapshot.insert(&m);

        let edited = m.clone().with_body("edited");
        let (snapshot, change) = snapshot.update(&edited);

        assert_eq!(
            change.unwrap().rows.reloaded,
            BTreeSet::from([IndexPath::new(0, 1)])
        );
        assert_eq!(
            snapshot.sections()[0].cells[1]
                .message()
                .unwrap()
                .body
                .as_deref(),
            Some("edited")
        );
    }

    #[test]
    fn update_of_missing_message_is_noop() {
        let (snapshot, _) = adaptive().insert(&message(0, 0));
        let (_, change) = snapshot.update(&message(0, 5));
        assert!(change.is_none());
    }

    #[test]
    fn from_messages_builds_full_projection() {
        let messages = vec![message(-1, 0), message(0, 0), message(0, 10)];
        let snapshot = Snapshot::from_messages(&messages, Some("Hi".into()), calendar(), true);

        assert_eq!(snapshot.sections().len(), 3);
        assert_eq!(snapshot.message_count(), 3);
        assert_eq!(snapshot.welcome_message(), Some("Hi"));
        assert_eq!(snapshot.sections()[1].kind, SectionKind::Info);
    }
}
