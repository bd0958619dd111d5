//! Relevance ranking over the in-memory creature list.
//!
//! Scores are additive: an id tier (numeric or `#NNN` text) plus field hits on
//! name, main skill, ingredients, type and talent. A second pass with all
//! whitespace removed catches queries like "pi ka" that miss the spaced fields.

pub mod reveal;

use crate::creatures::CreatureCard;

pub use reveal::{RevealWindow, PAGE_SIZE};

const NAME_EXACT: u32 = 150;
const NAME_PREFIX: u32 = 110;
const NAME_SUBSTRING: u32 = 80;
const SKILL: u32 = 70;
const INGREDIENT: u32 = 55;
const TYPE: u32 = 30;
const TALENT: u32 = 20;
const COMPACT_NAME: u32 = 25;
const COMPACT_SKILL: u32 = 15;
const COMPACT_INGREDIENT: u32 = 15;

pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn id_score(card: &CreatureCard, q: &str) -> u32 {
    let raw = card.dex_no.to_string();
    let padded = card.padded_dex();

    if !q.is_empty() && q.chars().all(|c| c.is_ascii_digit()) {
        if q.len() > 1 && q.starts_with('0') {
            return if padded == q || raw == q {
                260
            } else if padded.ends_with(q) || raw.ends_with(q) {
                180
            } else if padded.contains(q) || raw.contains(q) {
                95
            } else {
                0
            };
        }
        return if q.parse::<u64>().ok() == Some(u64::from(card.dex_no)) {
            260
        } else if raw.starts_with(q) {
            220
        } else if padded.ends_with(q) {
            200
        } else if raw.contains(q) {
            90
        } else if padded.contains(q) {
            25
        } else {
            0
        };
    }

    let id_text = format!("#{}", padded);
    if id_text == q {
        160
    } else if id_text.starts_with(q) {
        100
    } else if id_text.contains(q) {
        60
    } else {
        0
    }
}

fn ingredient_names(card: &CreatureCard) -> impl Iterator<Item = String> + '_ {
    card.berries
        .iter()
        .chain(card.ingredient_levels.iter().flat_map(|l| l.items.iter()))
        .map(|i| normalize(&i.name))
}

/// Relevance of `card` for `query`; 0 means no match (and always for an empty query).
pub fn score(card: &CreatureCard, query: &str) -> u32 {
    let q = normalize(query);
    if q.is_empty() {
        return 0;
    }
    let mut total = id_score(card, &q);

    let name = normalize(&card.name);
    let name_hit = if name == q {
        total += NAME_EXACT;
        true
    } else if name.starts_with(&q) {
        total += NAME_PREFIX;
        true
    } else if name.contains(&q) {
        total += NAME_SUBSTRING;
        true
    } else {
        false
    };

    let skill = card.main_skill.as_ref().map(|s| normalize(&s.name)).unwrap_or_default();
    let skill_hit = !skill.is_empty() && skill.contains(&q);
    if skill_hit {
        total += SKILL;
    }

    let ingredients: Vec<String> = ingredient_names(card).collect();
    let ingredient_hit = ingredients.iter().any(|n| n.contains(&q));
    if ingredient_hit {
        total += INGREDIENT;
    }

    if card.type_name.as_deref().is_some_and(|t| normalize(t).contains(&q)) {
        total += TYPE;
    }
    if card.talent.as_deref().is_some_and(|t| normalize(t).contains(&q)) {
        total += TALENT;
    }

    let cq = compact(&q);
    if !cq.is_empty() {
        if !name_hit && compact(&name).contains(&cq) {
            total += COMPACT_NAME;
        }
        if !skill_hit && !skill.is_empty() && compact(&skill).contains(&cq) {
            total += COMPACT_SKILL;
        }
        if !ingredient_hit && ingredients.iter().any(|n| compact(n).contains(&cq)) {
            total += COMPACT_INGREDIENT;
        }
    }
    total
}

fn ranked_indices(cards: &[CreatureCard], query: &str) -> Vec<usize> {
    let browsing = normalize(query).is_empty();
    let mut scored: Vec<(u32, usize)> = cards
        .iter()
        .enumerate()
        .map(|(i, c)| (if browsing { 0 } else { score(c, query) }, i))
        .filter(|(s, _)| browsing || *s > 0)
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then(cards[*a].dex_no.cmp(&cards[*b].dex_no)));
    scored.into_iter().map(|(_, i)| i).collect()
}

/// Matching cards, best first, ties by dex number. An empty query returns
/// everything in dex order.
pub fn filtered_entries<'a>(cards: &'a [CreatureCard], query: &str) -> Vec<&'a CreatureCard> {
    ranked_indices(cards, query).into_iter().map(|i| &cards[i]).collect()
}

/// A ranked creature list plus its reveal window.
pub struct SearchView {
    cards: Vec<CreatureCard>,
    query: String,
    ranked: Vec<usize>,
    window: RevealWindow,
}

impl SearchView {
    pub fn new(cards: Vec<CreatureCard>) -> Self {
        let mut view = Self {
            cards,
            query: String::new(),
            ranked: Vec::new(),
            window: RevealWindow::new(0),
        };
        view.rerank();
        view.window.reset(view.ranked.len());
        view
    }

    fn rerank(&mut self) {
        self.ranked = ranked_indices(&self.cards, &self.query);
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Re-ranks; a different normalized query starts again at one page.
    pub fn set_query(&mut self, query: &str) {
        let changed = normalize(query) != normalize(&self.query);
        self.query = query.to_string();
        self.rerank();
        if changed {
            self.window.reset(self.ranked.len());
        } else {
            self.window.set_total(self.ranked.len());
        }
    }

    /// Swaps in a freshly loaded list, keeping the query and how far the user scrolled.
    pub fn set_cards(&mut self, cards: Vec<CreatureCard>) {
        self.cards = cards;
        self.rerank();
        self.window.set_total(self.ranked.len());
    }

    pub fn observe_sentinel(&mut self, visible: bool) -> bool {
        self.window.observe(visible)
    }

    pub fn total_matches(&self) -> usize {
        self.ranked.len()
    }

    pub fn has_more(&self) -> bool {
        self.window.has_more()
    }

    pub fn visible(&self) -> Vec<&CreatureCard> {
        self.ranked[self.window.range()]
            .iter()
            .map(|&i| &self.cards[i])
            .collect()
    }
}
