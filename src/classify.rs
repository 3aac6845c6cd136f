//! Rule-based domain and tier classification of catalog entries.
//!
//! Each configured domain is an ordered rule set. Domains are evaluated in
//! declaration order and the **first** domain whose inclusion patterns match
//! wins; later domains are never consulted, even if they would match
//! "better". A domain whose exclusion patterns match the identifier is
//! skipped entirely, regardless of its inclusion patterns.
//!
//! Inside the matched domain the tier is decided by:
//!
//! 1. exact (case-insensitive) membership in the domain's priority list
//!    → tier 1, priority score 1, priority service;
//! 2. otherwise the tier-1, tier-2, tier-3 keyword groups, in that order,
//!    against `"{id} {title}"`;
//! 3. otherwise tier 1. A matched domain without a tier keyword is assumed
//!    to be transactional.
//!
//! | Band | Score |
//! |------|-------|
//! | priority service | 1 |
//! | tier 1 (transactional) | 10 |
//! | tier 2 (display) | 20 |
//! | tier 3 (analytics) | 30 |
//! | unclassified | 100 |

use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

use crate::config::{ClassificationConfig, DomainRuleConfig};
use crate::error::DiscoveryError;
use crate::models::{Classification, SearchResult};

pub const PRIORITY_SCORE_PRIORITY: u32 = 1;
pub const PRIORITY_SCORE_TIER1: u32 = 10;
pub const PRIORITY_SCORE_TIER2: u32 = 20;
pub const PRIORITY_SCORE_TIER3: u32 = 30;
pub const PRIORITY_SCORE_UNCLASSIFIED: u32 = 100;

/// A compiled domain rule set.
#[derive(Debug, Clone)]
pub struct DomainRule {
    pub name: String,
    pub expansion: String,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    priority_services: Vec<String>,
    tiers: [Vec<Regex>; 3],
}

impl DomainRule {
    fn compile(cfg: &DomainRuleConfig) -> Result<Self, DiscoveryError> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>, DiscoveryError> {
            patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| DiscoveryError::Configuration {
                            domain: cfg.name.clone(),
                            pattern: p.clone(),
                            message: e.to_string(),
                        })
                })
                .collect()
        };

        Ok(Self {
            name: cfg.name.clone(),
            expansion: cfg.expansion.clone(),
            include: compile_all(&cfg.include)?,
            exclude: compile_all(&cfg.exclude)?,
            priority_services: cfg.priority_services.clone(),
            tiers: [
                compile_all(&cfg.tier1)?,
                compile_all(&cfg.tier2)?,
                compile_all(&cfg.tier3)?,
            ],
        })
    }

    fn is_excluded(&self, id: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(id))
    }

    fn is_included(&self, id: &str, title: &str) -> bool {
        self.include
            .iter()
            .any(|re| re.is_match(id) || re.is_match(title))
    }

    fn tier_for(&self, id: &str, title: &str) -> Classification {
        if self
            .priority_services
            .iter()
            .any(|p| p.eq_ignore_ascii_case(id))
        {
            return Classification {
                domain: Some(self.name.clone()),
                tier: 1,
                priority_score: PRIORITY_SCORE_PRIORITY,
                is_priority_service: true,
            };
        }

        let haystack = format!("{} {}", id, title);
        let tier = self
            .tiers
            .iter()
            .position(|group| group.iter().any(|re| re.is_match(&haystack)))
            .map(|i| i as u8 + 1)
            .unwrap_or(1);

        Classification {
            domain: Some(self.name.clone()),
            tier,
            priority_score: band_score(tier),
            is_priority_service: false,
        }
    }
}

fn band_score(tier: u8) -> u32 {
    match tier {
        1 => PRIORITY_SCORE_TIER1,
        2 => PRIORITY_SCORE_TIER2,
        3 => PRIORITY_SCORE_TIER3,
        _ => PRIORITY_SCORE_UNCLASSIFIED,
    }
}

/// Ordered, compiled classification rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    domains: Vec<DomainRule>,
}

impl Classifier {
    /// Compile rules from config, falling back to [`default_domains`]
    /// when none are configured.
    pub fn from_config(config: &ClassificationConfig) -> Result<Self, DiscoveryError> {
        if config.domains.is_empty() {
            Self::new(&default_domains())
        } else {
            Self::new(&config.domains)
        }
    }

    /// Compile the given rules, preserving their order.
    ///
    /// Fails with [`DiscoveryError::Configuration`] on the first pattern
    /// that is not a valid regex.
    pub fn new(rules: &[DomainRuleConfig]) -> Result<Self, DiscoveryError> {
        let domains = rules
            .iter()
            .map(DomainRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { domains })
    }

    pub fn classify(&self, id: &str, title: &str) -> Classification {
        for domain in &self.domains {
            if domain.is_excluded(id) {
                continue;
            }
            if domain.is_included(id, title) {
                return domain.tier_for(id, title);
            }
        }
        Classification::unclassified()
    }

    /// Domain names in evaluation order.
    pub fn domain_names(&self) -> Vec<&str> {
        self.domains.iter().map(|d| d.name.as_str()).collect()
    }

    /// Expansion phrase used to enrich embedding documents.
    pub fn domain_expansion(&self, domain: &str) -> Option<&str> {
        self.domains
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(domain))
            .map(|d| d.expansion.as_str())
            .filter(|e| !e.is_empty())
    }
}

/// Semantic label for a tier.
pub fn tier_label(tier: u8) -> &'static str {
    match tier {
        1 => "transactional",
        2 => "display",
        3 => "analytics",
        _ => "unclassified",
    }
}

/// Position of a classification in the business-priority order:
/// priority service, tier 1, tier 2, tier 3, unclassified.
pub fn business_rank(is_priority_service: bool, tier: u8) -> u8 {
    if is_priority_service {
        return 0;
    }
    match tier {
        1..=3 => tier,
        _ => 4,
    }
}

/// Business priority dominates relevance: rank, then priority score,
/// then search score (higher first).
pub fn compare_business_priority(a: &SearchResult, b: &SearchResult) -> Ordering {
    business_rank(a.is_priority_service, a.tier)
        .cmp(&business_rank(b.is_priority_service, b.tier))
        .then(a.priority_score.cmp(&b.priority_score))
        .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
}

/// Stable in-place rerank by [`compare_business_priority`].
pub fn rerank(results: &mut [SearchResult]) {
    results.sort_by(compare_business_priority);
}

fn rule(
    name: &str,
    expansion: &str,
    include: &[&str],
    exclude: &[&str],
    priority: &[&str],
    tiers: [&[&str]; 3],
) -> DomainRuleConfig {
    let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    DomainRuleConfig {
        name: name.to_string(),
        expansion: expansion.to_string(),
        include: owned(include),
        exclude: owned(exclude),
        priority_services: owned(priority),
        tier1: owned(tiers[0]),
        tier2: owned(tiers[1]),
        tier3: owned(tiers[2]),
    }
}

/// Built-in rule set for a typical finance/logistics gateway catalog.
pub fn default_domains() -> Vec<DomainRuleConfig> {
    const TIER1: &[&str] = &["LINE_?ITEM", "MANAGE", "POST", "CLEAR", "CREATE", "MAINTAIN"];
    const TIER2: &[&str] = &["DISPLAY", "LIST", "_VH\\b", "FACTSHEET", "OBJECT_?PAGE"];
    const TIER3: &[&str] = &["ANALY", "KPI", "QUERY", "_CUBE", "OVERVIEW", "REPORT"];

    vec![
        rule(
            "AR",
            "accounts receivable customer invoices open items payments dunning",
            &["FAR_", "RECEIVABLE", "DUNNING", "CUSTOMER_?LINE"],
            &["^ZFAR_CFG_"],
            &["ZFAR_CUSTOMER_LINE_ITEMS_0001"],
            [TIER1, TIER2, TIER3],
        ),
        rule(
            "AP",
            "accounts payable supplier vendor invoices payments",
            &["FAP_", "PAYABLE", "SUPPLIER_?INVOICE", "VENDOR"],
            &["^ZFAP_CFG_"],
            &["API_SUPPLIERINVOICE_PROCESS_SRV"],
            [TIER1, TIER2, TIER3],
        ),
        rule(
            "FI-AA",
            "asset accounting fixed assets depreciation acquisitions retirements",
            &["FAA_", "FIXED[_ ]?ASSET", "ASSET[_ ]?ACCOUNTING", "DEPRECIATION"],
            &[],
            &["API_FIXEDASSET_SRV"],
            [TIER1, TIER2, TIER3],
        ),
        rule(
            "GL",
            "general ledger journal entries accounting documents balances",
            &["FAC_", "GL_?ACCOUNT", "JOURNAL_?ENTRY", "GENERAL_?LEDGER", "FINS_"],
            &[],
            &["API_JOURNALENTRYITEMBASIC_SRV"],
            [TIER1, TIER2, TIER3],
        ),
        rule(
            "SD",
            "sales and distribution sales orders deliveries billing customers",
            &["SALES_?ORDER", "^API_SD_", "BILLING", "OUTBOUND_?DELIVERY", "SALES"],
            &[],
            &["API_SALES_ORDER_SRV"],
            [TIER1, TIER2, TIER3],
        ),
        rule(
            "MM",
            "materials management purchasing purchase orders inventory stock",
            &["PURCHASE_?ORDER", "PURCHASE_?REQ", "MATERIAL", "INVENTORY", "^API_MM_"],
            &[],
            &["API_PURCHASEORDER_PROCESS_SRV"],
            [TIER1, TIER2, TIER3],
        ),
    ]
}
