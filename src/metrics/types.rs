use std::ops::{Add, AddAssign};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How a metric rolls up across days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationKind {
    Sum,
    Average,
}

/// How a metric value is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormatKind {
    Count,
    Currency,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub aggregation: AggregationKind,
    pub format: FormatKind,
    pub label: &'static str,
}

/// Every per-day field a marketplace reports for a product or campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKey {
    // Funnel
    Transitions,
    Cart,
    Orders,
    OrdersAmount,
    Buyouts,
    BuyoutsAmount,
    CartConversion,
    OrderConversion,
    BuyoutPercent,
    // Advertising
    Views,
    Clicks,
    Costs,
    Ctr,
    Cpc,
    Cpo,
    Drr,
    // Pricing
    Price,
    DiscountPrice,
    Discount,
}

impl MetricKey {
    pub fn all() -> &'static [MetricKey] {
        use MetricKey::*;
        &[
            Transitions,
            Cart,
            Orders,
            OrdersAmount,
            Buyouts,
            BuyoutsAmount,
            CartConversion,
            OrderConversion,
            BuyoutPercent,
            Views,
            Clicks,
            Costs,
            Ctr,
            Cpc,
            Cpo,
            Drr,
            Price,
            DiscountPrice,
            Discount,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        use MetricKey::*;
        match self {
            Transitions => "transitions",
            Cart => "cart",
            Orders => "orders",
            OrdersAmount => "ordersAmount",
            Buyouts => "buyouts",
            BuyoutsAmount => "buyoutsAmount",
            CartConversion => "cartConversion",
            OrderConversion => "orderConversion",
            BuyoutPercent => "buyoutPercent",
            Views => "views",
            Clicks => "clicks",
            Costs => "costs",
            Ctr => "ctr",
            Cpc => "cpc",
            Cpo => "cpo",
            Drr => "drr",
            Price => "price",
            DiscountPrice => "discountPrice",
            Discount => "discount",
        }
    }

    pub fn descriptor(&self) -> MetricDescriptor {
        use AggregationKind::{Average, Sum};
        use FormatKind::{Count, Currency, Percent};
        use MetricKey::*;

        let (aggregation, format, label) = match self {
            Transitions => (Sum, Count, "Card transitions"),
            Cart => (Sum, Count, "Added to cart"),
            Orders => (Sum, Count, "Orders"),
            OrdersAmount => (Sum, Currency, "Orders amount"),
            Buyouts => (Sum, Count, "Buyouts"),
            BuyoutsAmount => (Sum, Currency, "Buyouts amount"),
            CartConversion => (Average, Percent, "Cart conversion"),
            OrderConversion => (Average, Percent, "Order conversion"),
            BuyoutPercent => (Average, Percent, "Buyout rate"),
            Views => (Sum, Count, "Ad views"),
            Clicks => (Sum, Count, "Ad clicks"),
            Costs => (Sum, Currency, "Ad spend"),
            Ctr => (Average, Percent, "CTR"),
            Cpc => (Average, Currency, "CPC"),
            Cpo => (Average, Currency, "Cost per order"),
            Drr => (Average, Percent, "Spend-to-revenue"),
            Price => (Average, Currency, "Price"),
            DiscountPrice => (Average, Currency, "Price after discount"),
            Discount => (Average, Percent, "Discount"),
        };
        MetricDescriptor {
            aggregation,
            format,
            label,
        }
    }

    pub fn aggregation(&self) -> AggregationKind {
        self.descriptor().aggregation
    }
}

impl FromStr for MetricKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        MetricKey::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::UnknownMetric(s.to_string()))
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One calendar day of metrics for one entity. Absent fields mean
/// "not reported", which is distinct from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetricRecord {
    pub date: NaiveDate,
    pub transitions: Option<f64>,
    pub cart: Option<f64>,
    pub orders: Option<f64>,
    pub orders_amount: Option<f64>,
    pub buyouts: Option<f64>,
    pub buyouts_amount: Option<f64>,
    pub cart_conversion: Option<f64>,
    pub order_conversion: Option<f64>,
    pub buyout_percent: Option<f64>,
    pub views: Option<f64>,
    pub clicks: Option<f64>,
    pub costs: Option<f64>,
    pub ctr: Option<f64>,
    pub cpc: Option<f64>,
    pub cpo: Option<f64>,
    pub drr: Option<f64>,
    pub price: Option<f64>,
    pub discount_price: Option<f64>,
    pub discount: Option<f64>,
}

impl DailyMetricRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }

    pub fn get(&self, key: MetricKey) -> Option<f64> {
        use MetricKey::*;
        match key {
            Transitions => self.transitions,
            Cart => self.cart,
            Orders => self.orders,
            OrdersAmount => self.orders_amount,
            Buyouts => self.buyouts,
            BuyoutsAmount => self.buyouts_amount,
            CartConversion => self.cart_conversion,
            OrderConversion => self.order_conversion,
            BuyoutPercent => self.buyout_percent,
            Views => self.views,
            Clicks => self.clicks,
            Costs => self.costs,
            Ctr => self.ctr,
            Cpc => self.cpc,
            Cpo => self.cpo,
            Drr => self.drr,
            Price => self.price,
            DiscountPrice => self.discount_price,
            Discount => self.discount,
        }
    }

    /// Builder-style setter, mostly for fixtures.
    pub fn with(mut self, key: MetricKey, value: f64) -> Self {
        use MetricKey::*;
        let slot = match key {
            Transitions => &mut self.transitions,
            Cart => &mut self.cart,
            Orders => &mut self.orders,
            OrdersAmount => &mut self.orders_amount,
            Buyouts => &mut self.buyouts,
            BuyoutsAmount => &mut self.buyouts_amount,
            CartConversion => &mut self.cart_conversion,
            OrderConversion => &mut self.order_conversion,
            BuyoutPercent => &mut self.buyout_percent,
            Views => &mut self.views,
            Clicks => &mut self.clicks,
            Costs => &mut self.costs,
            Ctr => &mut self.ctr,
            Cpc => &mut self.cpc,
            Cpo => &mut self.cpo,
            Drr => &mut self.drr,
            Price => &mut self.price,
            DiscountPrice => &mut self.discount_price,
            Discount => &mut self.discount,
        };
        *slot = Some(value);
        self
    }
}

/// Raw counters summed over a period. Missing days contribute zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTotals {
    pub transitions: f64,
    pub cart: f64,
    pub orders: f64,
    pub orders_amount: f64,
    pub views: f64,
    pub clicks: f64,
    pub costs: f64,
}

impl RawTotals {
    pub fn from_record(r: &DailyMetricRecord) -> Self {
        Self {
            transitions: r.transitions.unwrap_or(0.0),
            cart: r.cart.unwrap_or(0.0),
            orders: r.orders.unwrap_or(0.0),
            orders_amount: r.orders_amount.unwrap_or(0.0),
            views: r.views.unwrap_or(0.0),
            clicks: r.clicks.unwrap_or(0.0),
            costs: r.costs.unwrap_or(0.0),
        }
    }
}

impl AddAssign for RawTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.transitions += rhs.transitions;
        self.cart += rhs.cart;
        self.orders += rhs.orders;
        self.orders_amount += rhs.orders_amount;
        self.views += rhs.views;
        self.clicks += rhs.clicks;
        self.costs += rhs.costs;
    }
}

impl Add for RawTotals {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

/// Totals and derived ratios for one entity (or a group) over one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSummary {
    #[serde(flatten)]
    pub totals: RawTotals,
    /// Daily records that fell inside the period, across every entity summed.
    pub record_count: usize,
    pub cart_conversion: Option<f64>,
    pub order_conversion: Option<f64>,
    pub cpc: Option<f64>,
    pub ctr: Option<f64>,
    pub cpo: Option<f64>,
    pub drr: Option<f64>,
}

impl PeriodSummary {
    /// Derive every ratio from the raw sums. A zero denominator yields `None`.
    pub fn from_totals(totals: RawTotals, record_count: usize) -> Self {
        let t = &totals;
        Self {
            cart_conversion: ratio(t.cart, t.transitions).map(|v| v * 100.0),
            order_conversion: ratio(t.orders, t.cart).map(|v| v * 100.0),
            cpc: ratio(t.costs, t.clicks),
            ctr: ratio(t.clicks, t.views).map(|v| v * 100.0),
            cpo: ratio(t.costs, t.orders),
            drr: ratio(t.costs, t.orders_amount).map(|v| v * 100.0),
            totals,
            record_count,
        }
    }

    /// The summary's value for `key`, when the summary carries it.
    pub fn get(&self, key: MetricKey) -> Option<f64> {
        use MetricKey::*;
        let t = &self.totals;
        match key {
            Transitions => Some(t.transitions),
            Cart => Some(t.cart),
            Orders => Some(t.orders),
            OrdersAmount => Some(t.orders_amount),
            Views => Some(t.views),
            Clicks => Some(t.clicks),
            Costs => Some(t.costs),
            CartConversion => self.cart_conversion,
            OrderConversion => self.order_conversion,
            Cpc => self.cpc,
            Ctr => self.ctr,
            Cpo => self.cpo,
            Drr => self.drr,
            Buyouts | BuyoutsAmount | BuyoutPercent | Price | DiscountPrice | Discount => None,
        }
    }

    /// Keys carried by a summary, in display order.
    pub fn keys() -> &'static [MetricKey] {
        use MetricKey::*;
        &[
            Transitions,
            Cart,
            Orders,
            OrdersAmount,
            CartConversion,
            OrderConversion,
            Views,
            Clicks,
            Costs,
            Ctr,
            Cpc,
            Cpo,
            Drr,
        ]
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Daily records fetched for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecords {
    pub entity_id: String,
    pub records: Vec<DailyMetricRecord>,
}
