//! Tool declarations shared verbatim by the text channels and the voice
//! bridge. Shapes here are the model-facing contract from the design table.

use serde_json::json;

use llm_cell::ToolDefinition;
use shared_config::ServicesCatalog;

pub fn tool_definitions(catalog: &ServicesCatalog) -> Vec<ToolDefinition> {
    let service_keys = catalog.service_keys();

    vec![
        ToolDefinition {
            name: "check_availability".to_string(),
            description: "Check available appointment slots for a specific date and service type"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": {
                        "type": "string",
                        "description": "Date in YYYY-MM-DD format"
                    },
                    "service_type": {
                        "type": "string",
                        "enum": service_keys,
                        "description": "Type of service requested"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of slots to return (optional)"
                    }
                },
                "required": ["date", "service_type"]
            }),
        },
        ToolDefinition {
            name: "book_appointment".to_string(),
            description: "Book an appointment for a customer".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "customer_name": {
                        "type": "string",
                        "description": "Customer's full name"
                    },
                    "customer_phone": {
                        "type": "string",
                        "description": "Customer's phone number"
                    },
                    "customer_email": {
                        "type": "string",
                        "description": "Customer's email address (optional)"
                    },
                    "start_time": {
                        "type": "string",
                        "description": "Appointment start time in ISO 8601 format"
                    },
                    "service_type": {
                        "type": "string",
                        "enum": service_keys,
                        "description": "Type of service"
                    },
                    "provider": {
                        "type": "string",
                        "description": "Preferred provider name (optional)"
                    },
                    "notes": {
                        "type": "string",
                        "description": "Special requests or notes (optional)"
                    }
                },
                "required": ["customer_name", "customer_phone", "start_time", "service_type"]
            }),
        },
        ToolDefinition {
            name: "reschedule_appointment".to_string(),
            description: "Reschedule an existing appointment to a new time".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "appointment_id": {
                        "type": "string",
                        "description": "Calendar event id of the appointment"
                    },
                    "new_start_time": {
                        "type": "string",
                        "description": "New start time in ISO 8601 format"
                    },
                    "service_type": {
                        "type": "string",
                        "enum": service_keys,
                        "description": "Type of service"
                    },
                    "provider": {
                        "type": "string",
                        "description": "Preferred provider name (optional)"
                    }
                },
                "required": ["appointment_id", "new_start_time", "service_type"]
            }),
        },
        ToolDefinition {
            name: "cancel_appointment".to_string(),
            description: "Cancel an existing appointment".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "appointment_id": {
                        "type": "string",
                        "description": "Calendar event id of the appointment"
                    },
                    "cancellation_reason": {
                        "type": "string",
                        "description": "Reason for the cancellation (optional)"
                    }
                },
                "required": ["appointment_id"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_match_the_contract_table() {
        let catalog = ServicesCatalog::standard();
        let tools = tool_definitions(&catalog);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "check_availability",
                "book_appointment",
                "reschedule_appointment",
                "cancel_appointment"
            ]
        );

        let booking = &tools[1];
        let required: Vec<&str> = booking.parameters["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(
            required,
            vec!["customer_name", "customer_phone", "start_time", "service_type"]
        );
    }

    #[test]
    fn service_enum_includes_catalog_keys() {
        let catalog = ServicesCatalog::standard();
        let tools = tool_definitions(&catalog);
        let service_enum = tools[0].parameters["properties"]["service_type"]["enum"]
            .as_array()
            .unwrap();
        assert!(service_enum.iter().any(|v| v == "botox"));
        assert!(service_enum.iter().any(|v| v == "consultation"));
    }
}
