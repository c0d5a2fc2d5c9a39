//! Dose history reconciliation.
//!
//! Pump history arrives out of order and overlapping: temp basals are
//! superseded before they finish, suspends are not always followed by a
//! recorded resume. This module turns that history into a clean,
//! chronologically sorted timeline:
//! - A suspend left open when another event arrives is closed at that event,
//!   and a resume is synthesized there
//! - A basal or temp basal is truncated where the next one starts
//! - A temp basal interrupted by a suspend continues after the resume
//! - Basal records that end up with no duration are dropped

use crate::{Dose, DoseType};

/// Pending state while walking the history in time order
#[derive(Default)]
struct Reconciler {
    output: Vec<Dose>,
    last_suspend: Option<Dose>,
    last_basal: Option<Dose>,
}

impl Reconciler {
    fn push_basal(&mut self, dose: Dose) {
        if dose.end > dose.start {
            self.output.push(dose);
        } else {
            tracing::trace!("Dropping zero-duration {:?} at {}", dose.dose_type, dose.start);
        }
    }

    /// Close the open suspend at `at`, recording `resume` after it.
    fn close_suspend(&mut self, suspend: Dose, resume: Dose) {
        let at = resume.start;
        self.output.push(Dose {
            end: at,
            ..suspend
        });

        // Continue a temp basal that was programmed to run past the resume
        if let Some(last) = self.last_basal.take() {
            if last.end > resume.end {
                self.last_basal = Some(Dose {
                    start: resume.end,
                    ..last
                });
            }
        }

        self.output.push(resume);
    }

    fn close_suspend_with_synthetic_resume(&mut self, at: chrono::DateTime<chrono::Utc>) {
        if let Some(suspend) = self.last_suspend.take() {
            tracing::debug!(
                "Suspend at {} has no resume before {}; synthesizing one",
                suspend.start,
                at
            );
            let resume = Dose::new(DoseType::Resume, at, at, 0.0);
            self.close_suspend(suspend, resume);
        }
    }

    fn add(&mut self, dose: Dose) {
        match dose.dose_type {
            DoseType::Bolus => {
                self.close_suspend_with_synthetic_resume(dose.start);
                self.output.push(dose);
            }
            DoseType::Basal | DoseType::TempBasal => {
                self.close_suspend_with_synthetic_resume(dose.start);

                // Last writer wins: the new rate replaces whatever was running
                if let Some(last) = self.last_basal.take() {
                    let end = last.end.min(dose.start);
                    self.push_basal(Dose { end, ..last });
                }
                self.last_basal = Some(dose);
            }
            DoseType::Suspend => {
                self.close_suspend_with_synthetic_resume(dose.start);

                if let Some(last) = self.last_basal.take() {
                    let end = last.end.min(dose.start);
                    // Keep it pending so it can continue after the resume
                    if last.end > dose.start {
                        self.last_basal = Some(last.clone());
                    }
                    self.push_basal(Dose { end, ..last });
                }
                self.last_suspend = Some(dose);
            }
            DoseType::Resume => match self.last_suspend.take() {
                Some(suspend) => self.close_suspend(suspend, dose),
                None => self.output.push(dose),
            },
        }
    }

    fn finish(mut self) -> Vec<Dose> {
        if let Some(suspend) = self.last_suspend.take() {
            // No data past the suspend: leave it open as recorded
            self.output.push(suspend);
        } else if let Some(last) = self.last_basal.take() {
            self.push_basal(last);
        }

        sort_by_start(&mut self.output);
        self.output
    }
}

/// Stable sort by start time; equal starts keep their relative order.
pub fn sort_by_start(doses: &mut [Dose]) {
    doses.sort_by_key(|dose| dose.start);
}

/// Reconcile raw dose history into a sorted, non-overlapping timeline.
///
/// Input may be in any order; doses sharing a start time are processed in
/// input order.
pub fn reconciled(doses: &[Dose]) -> Vec<Dose> {
    let mut sorted = doses.to_vec();
    sort_by_start(&mut sorted);

    let mut reconciler = Reconciler::default();
    for dose in sorted {
        reconciler.add(dose);
    }

    let output = reconciler.finish();
    tracing::debug!("Reconciled {} doses into {}", doses.len(), output.len());
    output
}
