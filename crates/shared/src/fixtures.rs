//! Demonstration pipeline used to seed the reference server and as the
//! client-side fallback board.

use chrono::{DateTime, Duration, Utc};

use crate::{
    domain::{BoardItemId, CandidateId, CandidateStatus, ColumnId, Decision, Phase, Priority},
    protocol::{Board, Candidate, Column, NextAction, PhaseHistoryEntry},
};

struct DemoCandidate {
    item: &'static str,
    candidate: &'static str,
    name: &'static str,
    email: &'static str,
    position: &'static str,
    phase: Phase,
    priority: Priority,
    ai_score: Option<u8>,
    days_in_phase: u32,
}

const DEMO_CANDIDATES: &[DemoCandidate] = &[
    DemoCandidate {
        item: "item-1",
        candidate: "cand-1",
        name: "Marco Rossi",
        email: "marco.rossi@example.com",
        position: "Senior Backend Engineer",
        phase: Phase::CvReview,
        priority: Priority::High,
        ai_score: Some(82),
        days_in_phase: 2,
    },
    DemoCandidate {
        item: "item-2",
        candidate: "cand-2",
        name: "Giulia Bianchi",
        email: "giulia.bianchi@example.com",
        position: "Frontend Engineer",
        phase: Phase::CvReview,
        priority: Priority::Medium,
        ai_score: Some(74),
        days_in_phase: 1,
    },
    DemoCandidate {
        item: "item-3",
        candidate: "cand-3",
        name: "Luca Ferrari",
        email: "luca.ferrari@example.com",
        position: "Data Engineer",
        phase: Phase::CvReview,
        priority: Priority::Low,
        ai_score: None,
        days_in_phase: 0,
    },
    DemoCandidate {
        item: "item-4",
        candidate: "cand-4",
        name: "Sofia Romano",
        email: "sofia.romano@example.com",
        position: "Product Designer",
        phase: Phase::PhoneScreening,
        priority: Priority::Medium,
        ai_score: Some(88),
        days_in_phase: 3,
    },
    DemoCandidate {
        item: "item-5",
        candidate: "cand-5",
        name: "Alessandro Colombo",
        email: "alessandro.colombo@example.com",
        position: "Site Reliability Engineer",
        phase: Phase::TechnicalInterview,
        priority: Priority::Urgent,
        ai_score: Some(91),
        days_in_phase: 6,
    },
    DemoCandidate {
        item: "item-6",
        candidate: "cand-6",
        name: "Chiara Ricci",
        email: "chiara.ricci@example.com",
        position: "Engineering Manager",
        phase: Phase::CulturalFit,
        priority: Priority::High,
        ai_score: Some(79),
        days_in_phase: 4,
    },
    DemoCandidate {
        item: "item-7",
        candidate: "cand-7",
        name: "Matteo Greco",
        email: "matteo.greco@example.com",
        position: "Senior Backend Engineer",
        phase: Phase::FinalDecision,
        priority: Priority::High,
        ai_score: Some(86),
        days_in_phase: 1,
    },
];

fn column_color(phase: Phase) -> &'static str {
    match phase {
        Phase::CvReview => "#64748b",
        Phase::PhoneScreening => "#0ea5e9",
        Phase::TechnicalInterview => "#8b5cf6",
        Phase::CulturalFit => "#f59e0b",
        Phase::FinalDecision => "#10b981",
    }
}

fn timeline_for(phase: Phase, days_in_phase: u32, now: DateTime<Utc>) -> Vec<PhaseHistoryEntry> {
    let entered_current = now - Duration::days(i64::from(days_in_phase));
    let mut entries: Vec<PhaseHistoryEntry> = Phase::ALL[..phase.index()]
        .iter()
        .enumerate()
        .map(|(offset, past)| {
            let steps_back = i64::try_from(phase.index() - offset).unwrap_or(0);
            let entered_at = entered_current - Duration::days(3 * steps_back);
            PhaseHistoryEntry {
                phase_id: *past,
                phase_name: past.label().to_string(),
                entered_at,
                exited_at: Some(entered_at + Duration::days(3)),
                decision: Decision::Passed,
                score: Some(80),
                notes: None,
                interviewer: None,
                duration: Some(72),
                automated: false,
                next_phase: past.next(),
            }
        })
        .collect();
    entries.push(PhaseHistoryEntry {
        phase_id: phase,
        phase_name: phase.label().to_string(),
        entered_at: entered_current,
        exited_at: None,
        decision: Decision::Pending,
        score: None,
        notes: None,
        interviewer: None,
        duration: None,
        automated: false,
        next_phase: None,
    });
    entries
}

/// Builds the demonstration board: one column per phase, seven candidates.
pub fn demo_board(now: DateTime<Utc>) -> Board {
    let columns = Phase::ALL
        .into_iter()
        .map(|phase| Column {
            id: ColumnId::new(phase.as_str()),
            title: phase.label().to_string(),
            phase_id: phase,
            color: column_color(phase).to_string(),
            candidates: DEMO_CANDIDATES
                .iter()
                .filter(|demo| demo.phase == phase)
                .map(|demo| Candidate {
                    id: BoardItemId::new(demo.item),
                    candidate_id: CandidateId::new(demo.candidate),
                    name: demo.name.to_string(),
                    email: demo.email.to_string(),
                    position: demo.position.to_string(),
                    current_phase: phase,
                    status: CandidateStatus::Active,
                    priority: demo.priority,
                    ai_score: demo.ai_score,
                    days_in_phase: demo.days_in_phase,
                    next_action: Some(NextAction {
                        action_type: "review".to_string(),
                        description: format!("Review {} outcome", phase.label()),
                        due_date: Some(now + Duration::days(2)),
                        assigned_to: None,
                        automated: false,
                    }),
                    flags: Vec::new(),
                    timeline: timeline_for(phase, demo.days_in_phase, now),
                })
                .collect(),
            capacity: None,
            sla_warning_hours: Some(72),
        })
        .collect();
    Board::new(columns)
}
