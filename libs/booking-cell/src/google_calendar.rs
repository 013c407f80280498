use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use shared_config::{AppConfig, ServicesCatalog};
use shared_utils::{clock_label, SPA_TZ};

use crate::calendar::{CalendarError, CalendarPort, CreateEventRequest, EventDetails};
use crate::models::Slot;

/// Calendar-of-record client over the Calendar REST v3 surface.
pub struct GoogleCalendarClient {
    client: Client,
    base_url: String,
    calendar_id: String,
    token: String,
    catalog: ServicesCatalog,
    open_hour: u32,
    close_hour: u32,
}

impl GoogleCalendarClient {
    pub fn new(config: &AppConfig, catalog: ServicesCatalog) -> Self {
        Self {
            client: Client::new(),
            base_url: config.google_calendar_base_url.trim_end_matches('/').to_string(),
            calendar_id: config.google_calendar_id.clone(),
            token: config.google_calendar_token.clone(),
            catalog,
            open_hour: config.business_open_hour,
            close_hour: config.business_close_hour,
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CalendarError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Calendar request: {} {}", method, url);

        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token);
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req
            .send()
            .await
            .map_err(|e| CalendarError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CalendarError::InvalidInput("event not found".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Calendar API error ({}): {}", status, text);
            return Err(CalendarError::Unavailable(format!("{}: {}", status, text)));
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CalendarError::Unavailable(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| CalendarError::Unavailable(format!("bad response body: {}", e)))
    }

    fn events_path(&self, query: &str) -> String {
        format!(
            "/calendars/{}/events{}",
            urlencoding::encode(&self.calendar_id),
            query
        )
    }

    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<Value>, CalendarError> {
        let query = format!(
            "?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime",
            urlencoding::encode(&time_min.to_rfc3339()),
            urlencoding::encode(&time_max.to_rfc3339()),
        );
        let result = self.request(Method::GET, &self.events_path(&query), None).await?;
        Ok(result
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn event_time(value: &Value, field: &str) -> Option<DateTime<Utc>> {
        let raw = value
            .get(field)
            .and_then(|v| v.get("dateTime").or_else(|| v.get("date")))
            .and_then(Value::as_str)?;
        shared_utils::parse_iso_datetime(raw).ok()
    }

    fn event_description(request: &CreateEventRequest) -> String {
        format!(
            "Service: {}\nCustomer: {}\nPhone: {}\nEmail: {}\nProvider: {}\nNotes: {}",
            request.service_name,
            request.customer_name,
            request.customer_phone,
            request.customer_email.as_deref().unwrap_or("Not provided"),
            request.provider.as_deref().unwrap_or("Not specified"),
            request.notes.as_deref().unwrap_or("None"),
        )
    }
}

#[async_trait]
impl CalendarPort for GoogleCalendarClient {
    async fn available_slots(
        &self,
        date: NaiveDate,
        service_type: &str,
    ) -> Result<Vec<Slot>, CalendarError> {
        let service = self
            .catalog
            .service(service_type)
            .ok_or_else(|| {
                CalendarError::InvalidInput(format!("Unknown service type: {}", service_type))
            })?;
        let duration = Duration::minutes(service.duration_minutes as i64);

        let open = NaiveTime::from_hms_opt(self.open_hour, 0, 0)
            .ok_or_else(|| CalendarError::InvalidInput("bad business open hour".to_string()))?;
        let close = NaiveTime::from_hms_opt(self.close_hour, 0, 0)
            .ok_or_else(|| CalendarError::InvalidInput("bad business close hour".to_string()))?;

        let day_start = SPA_TZ
            .from_local_datetime(&date.and_time(open))
            .single()
            .ok_or_else(|| CalendarError::InvalidInput("ambiguous business open".to_string()))?;
        let day_end = SPA_TZ
            .from_local_datetime(&date.and_time(close))
            .single()
            .ok_or_else(|| CalendarError::InvalidInput("ambiguous business close".to_string()))?;

        let events = self
            .list_events(day_start.with_timezone(&Utc), day_end.with_timezone(&Utc))
            .await?;

        let mut busy_periods: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        for event in &events {
            if let (Some(start), Some(end)) = (
                Self::event_time(event, "start"),
                Self::event_time(event, "end"),
            ) {
                busy_periods.push((start, end));
            }
        }

        let mut slots = Vec::new();
        let mut current = day_start.with_timezone(&Utc);
        let day_end_utc = day_end.with_timezone(&Utc);

        while current + duration <= day_end_utc {
            let slot_end = current + duration;

            let collision = busy_periods
                .iter()
                .find(|(busy_start, busy_end)| current < *busy_end && slot_end > *busy_start);

            match collision {
                Some((_, busy_end)) => {
                    // Skip ahead to the end of the busy interval.
                    current = *busy_end;
                }
                None => {
                    slots.push(Slot {
                        start: current.with_timezone(&SPA_TZ).to_rfc3339(),
                        end: slot_end.with_timezone(&SPA_TZ).to_rfc3339(),
                        start_time: clock_label(current),
                        end_time: clock_label(slot_end),
                    });
                    current += Duration::minutes(30);
                }
            }
        }

        debug!(
            "Generated {} slots for {} on {}",
            slots.len(),
            service_type,
            date
        );
        Ok(slots)
    }

    async fn create_event(
        &self,
        request: &CreateEventRequest,
    ) -> Result<Option<String>, CalendarError> {
        let mut attendees = Vec::new();
        if let Some(email) = &request.customer_email {
            attendees.push(json!({ "email": email }));
        }

        let body = json!({
            "summary": request.summary,
            "description": Self::event_description(request),
            "start": {
                "dateTime": request.start.with_timezone(&SPA_TZ).to_rfc3339(),
                "timeZone": "America/New_York",
            },
            "end": {
                "dateTime": request.end.with_timezone(&SPA_TZ).to_rfc3339(),
                "timeZone": "America/New_York",
            },
            "attendees": attendees,
            "reminders": {
                "useDefault": false,
                "overrides": [
                    { "method": "email", "minutes": 24 * 60 },
                    { "method": "popup", "minutes": 60 },
                ],
            },
        });

        let created = self
            .request(Method::POST, &self.events_path(""), Some(body))
            .await?;

        let event_id = created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        if event_id.is_none() {
            warn!("Calendar insert returned without an event id");
        }
        Ok(event_id)
    }

    async fn find_event(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        summary: &str,
    ) -> Result<Option<String>, CalendarError> {
        let window_start = start - Duration::minutes(1);
        let window_end = end + Duration::minutes(1);
        let events = self.list_events(window_start, window_end).await?;

        for event in events {
            let event_id = match event.get("id").and_then(Value::as_str) {
                Some(id) => id,
                None => continue,
            };
            let event_summary = event.get("summary").and_then(Value::as_str).unwrap_or("");
            if event_summary.trim() != summary.trim() {
                continue;
            }
            let event_start = match Self::event_time(&event, "start") {
                Some(t) => t,
                None => continue,
            };
            if (event_start - start).num_seconds().abs() <= 60 {
                return Ok(Some(event_id.to_string()));
            }
        }

        Ok(None)
    }

    async fn update_event(
        &self,
        event_id: &str,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<bool, CalendarError> {
        let path = self.events_path(&format!("/{}", urlencoding::encode(event_id)));

        let mut event = match self.request(Method::GET, &path, None).await {
            Ok(event) => event,
            Err(CalendarError::InvalidInput(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        event["start"] = json!({
            "dateTime": new_start.with_timezone(&SPA_TZ).to_rfc3339(),
            "timeZone": "America/New_York",
        });
        event["end"] = json!({
            "dateTime": new_end.with_timezone(&SPA_TZ).to_rfc3339(),
            "timeZone": "America/New_York",
        });

        self.request(Method::PUT, &path, Some(event)).await?;
        Ok(true)
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, CalendarError> {
        let path = self.events_path(&format!("/{}", urlencoding::encode(event_id)));
        match self.request(Method::DELETE, &path, None).await {
            Ok(_) => Ok(true),
            Err(CalendarError::InvalidInput(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<EventDetails>, CalendarError> {
        let path = self.events_path(&format!("/{}", urlencoding::encode(event_id)));
        let event = match self.request(Method::GET, &path, None).await {
            Ok(event) => event,
            Err(CalendarError::InvalidInput(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let start = Self::event_time(&event, "start");
        let end = Self::event_time(&event, "end");
        match (start, end) {
            (Some(start), Some(end)) => Ok(Some(EventDetails {
                id: event.get("id").and_then(Value::as_str).unwrap_or(event_id).to_string(),
                summary: event.get("summary").and_then(Value::as_str).unwrap_or("").to_string(),
                description: event
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                start,
                end,
                status: event.get("status").and_then(Value::as_str).unwrap_or("").to_string(),
            })),
            _ => Ok(None),
        }
    }
}
