//! Profile and review schedule command implementations

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use subwise_core::models::{ContactDetails, Profile, ProfileUpdate};
use subwise_core::review::{ReviewFrequency, ReviewSchedule, ReviewSlot, ScheduleChange};

use super::App;

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

fn ordinal(n: u8) -> &'static str {
    match n {
        1 => "first",
        2 => "second",
        3 => "third",
        4 => "fourth",
        _ => "fifth",
    }
}

fn print_field(label: &str, value: Option<&str>) {
    if let Some(value) = value {
        println!("   {:10} {}", label, value);
    }
}

fn print_review(schedule: &ReviewSchedule) {
    println!("   Review:    {}", if schedule.enabled { "on" } else { "off" });
    println!("   Frequency: {}", schedule.frequency);
    if let Some(slot) = &schedule.slot {
        let day = WEEKDAYS
            .get(slot.day_of_week as usize)
            .copied()
            .unwrap_or("?");
        if schedule.frequency == ReviewFrequency::Weekly {
            println!("   Slot:      {} at {} UTC", day, slot.time.format("%H:%M"));
        } else {
            println!(
                "   Slot:      {} {} at {} UTC",
                ordinal(slot.week_of_month),
                day,
                slot.time.format("%H:%M")
            );
        }
    }
    if let Some(last) = schedule.last_reviewed {
        println!("   Last:      {}", last.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(next) = schedule.next_review {
        println!("   Next:      {}", next.format("%Y-%m-%d %H:%M UTC"));
    }
}

fn print_profile(profile: &Profile) {
    let contact = &profile.contact;
    println!();
    println!("👤 Profile");
    println!("   ─────────────────────────────────────────────────────────────");
    print_field("Name:", contact.name.as_deref());
    print_field("Email:", contact.email.as_deref());
    print_field("Phone:", contact.phone.as_deref());
    print_field("Address:", contact.address.as_deref());
    print_field("City:", contact.city.as_deref());
    print_field("State:", contact.state.as_deref());
    print_field("Zip:", contact.zip_code.as_deref());
    print_field("Country:", contact.country.as_deref());
    print_field("Bio:", contact.bio.as_deref());
    print_field("Picture:", profile.profile_picture.as_deref());
    println!();
    print_review(&profile.review);
    println!();
}

pub async fn cmd_profile_show(app: &App) -> Result<()> {
    let profile = app
        .profiles
        .load_or_create()
        .await
        .context("Failed to load profile")?;
    app.save()?;
    print_profile(&profile);
    Ok(())
}

pub async fn cmd_profile_set(app: &App, contact: ContactDetails) -> Result<()> {
    if contact == ContactDetails::default() {
        bail!("Nothing to update. Pass at least one field, e.g. --name or --city");
    }

    let profile = app
        .profiles
        .update(&ProfileUpdate {
            contact,
            ..Default::default()
        })
        .await
        .context("Failed to update profile")?;
    app.save()?;

    println!("✅ Profile updated");
    print_profile(&profile);
    Ok(())
}

pub async fn cmd_profile_picture(app: &App, file: &Path) -> Result<()> {
    if app.is_local() {
        bail!("Profile pictures need file storage. Run with --remote");
    }

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("Picture path has no file name")?;
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    println!("📤 Uploading {} ({} bytes)...", file_name, bytes.len());
    let url = app
        .profiles
        .upload_picture(file_name, bytes)
        .await
        .context("Failed to upload profile picture")?;

    println!("✅ Profile picture updated");
    println!("   {}", url);
    Ok(())
}

pub async fn cmd_review_status(app: &App) -> Result<()> {
    let profile = app
        .profiles
        .load_or_create()
        .await
        .context("Failed to load profile")?;
    app.save()?;

    println!();
    print_review(&profile.review);
    if app.profiles.review_due().await? {
        println!();
        println!("   ⏰ A subscription review is due");
    }
    println!();
    Ok(())
}

pub async fn cmd_review_enable(app: &App) -> Result<()> {
    let profile = app
        .profiles
        .enable_review_schedule()
        .await
        .context("Failed to enable review schedule")?;
    app.save()?;

    println!("✅ Review reminders on");
    print_review(&profile.review);
    Ok(())
}

/// Change frequency and/or slot; slot fields not given keep their current value
pub async fn cmd_review_set(
    app: &App,
    frequency: Option<ReviewFrequency>,
    day_of_week: Option<u8>,
    week_of_month: Option<u8>,
    time: Option<&str>,
) -> Result<()> {
    let time = time
        .map(|t| NaiveTime::parse_from_str(t, "%H:%M"))
        .transpose()
        .context("Invalid --time format (use HH:MM)")?;

    let slot = if day_of_week.is_some() || week_of_month.is_some() || time.is_some() {
        let current = app
            .profiles
            .load_or_create()
            .await
            .context("Failed to load profile")?
            .review
            .slot
            .unwrap_or_default();
        Some(ReviewSlot {
            day_of_week: day_of_week.unwrap_or(current.day_of_week),
            week_of_month: week_of_month.unwrap_or(current.week_of_month),
            time: time.unwrap_or(current.time),
        })
    } else {
        None
    };

    if frequency.is_none() && slot.is_none() {
        bail!("Nothing to change. Pass --frequency, --day, --week or --time");
    }

    let profile = app
        .profiles
        .set_review_schedule(ScheduleChange { frequency, slot })
        .await
        .context("Failed to update review schedule")?;
    app.save()?;

    println!("✅ Review schedule updated");
    print_review(&profile.review);
    Ok(())
}

pub async fn cmd_review_disable(app: &App) -> Result<()> {
    app.profiles
        .disable_review_schedule()
        .await
        .context("Failed to disable review schedule")?;
    app.save()?;

    println!("✅ Review reminders off");
    Ok(())
}

pub async fn cmd_review_done(app: &App) -> Result<()> {
    let profile = app
        .profiles
        .mark_reviewed()
        .await
        .context("Failed to record review")?;
    app.save()?;

    println!("✅ Review recorded");
    print_review(&profile.review);
    Ok(())
}
