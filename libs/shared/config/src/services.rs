use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One bookable treatment from the spa's service menu.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub display_name: String,
    pub duration_minutes: i32,
    pub price_range: String,
    pub description: String,
    pub prep_instructions: String,
    pub aftercare: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub title: String,
    pub specialties: Vec<String>,
    pub credentials: String,
}

/// Static, name-keyed catalog of services and providers.
///
/// Built once at startup and handed into the orchestrators; the key is the
/// `service_type` string that flows through tool calls and calendar events.
#[derive(Debug, Clone)]
pub struct ServicesCatalog {
    services: HashMap<String, ServiceInfo>,
    providers: HashMap<String, ProviderInfo>,
}

impl ServicesCatalog {
    pub fn standard() -> Self {
        let mut services = HashMap::new();

        services.insert(
            "botox".to_string(),
            ServiceInfo {
                display_name: "Botox".to_string(),
                duration_minutes: 30,
                price_range: "$300-$600".to_string(),
                description: "Botulinum toxin injections to reduce fine lines and wrinkles"
                    .to_string(),
                prep_instructions: "Avoid alcohol and blood thinners 24 hours before treatment"
                    .to_string(),
                aftercare: "No rubbing the treated area for 24 hours, avoid lying down for 4 hours"
                    .to_string(),
            },
        );
        services.insert(
            "dermal_fillers".to_string(),
            ServiceInfo {
                display_name: "Dermal Fillers".to_string(),
                duration_minutes: 45,
                price_range: "$600-$1200 per syringe".to_string(),
                description: "Injectable hyaluronic acid for volume restoration and enhancement"
                    .to_string(),
                prep_instructions: "Avoid alcohol and blood thinners 24-48 hours before"
                    .to_string(),
                aftercare: "Avoid strenuous exercise for 24 hours, ice as needed for swelling"
                    .to_string(),
            },
        );
        services.insert(
            "laser_hair_removal".to_string(),
            ServiceInfo {
                display_name: "Laser Hair Removal".to_string(),
                duration_minutes: 30,
                price_range: "$100-$500 per session".to_string(),
                description: "Permanent hair reduction using advanced laser technology".to_string(),
                prep_instructions: "Shave area 24 hours before, avoid sun exposure for 2 weeks"
                    .to_string(),
                aftercare: "Avoid sun exposure, use SPF 30+, no hot showers for 24 hours"
                    .to_string(),
            },
        );
        services.insert(
            "hydrafacial".to_string(),
            ServiceInfo {
                display_name: "HydraFacial".to_string(),
                duration_minutes: 60,
                price_range: "$200-$300".to_string(),
                description: "Deep cleansing, exfoliation, and hydration facial treatment"
                    .to_string(),
                prep_instructions: "Come with clean face, no makeup".to_string(),
                aftercare: "Avoid sun exposure for 24 hours, use gentle skincare".to_string(),
            },
        );
        services.insert(
            "chemical_peel".to_string(),
            ServiceInfo {
                display_name: "Chemical Peel".to_string(),
                duration_minutes: 45,
                price_range: "$150-$400".to_string(),
                description: "Exfoliating treatment to improve skin texture and tone".to_string(),
                prep_instructions: "Discontinue retinoids 3 days before, avoid sun exposure"
                    .to_string(),
                aftercare:
                    "No picking at peeling skin, use gentle cleanser and moisturizer, SPF required"
                        .to_string(),
            },
        );
        services.insert(
            "microneedling".to_string(),
            ServiceInfo {
                display_name: "Microneedling".to_string(),
                duration_minutes: 60,
                price_range: "$300-$500".to_string(),
                description: "Collagen induction therapy for skin rejuvenation".to_string(),
                prep_instructions: "Come with clean face, avoid blood thinners".to_string(),
                aftercare: "Avoid makeup for 24 hours, gentle skincare only, avoid sun".to_string(),
            },
        );
        services.insert(
            "coolsculpting".to_string(),
            ServiceInfo {
                display_name: "CoolSculpting".to_string(),
                duration_minutes: 60,
                price_range: "$750-$1500 per area".to_string(),
                description: "Non-invasive fat reduction through controlled cooling".to_string(),
                prep_instructions: "Wear comfortable clothing, eat normally".to_string(),
                aftercare: "Massage treated area as directed, maintain healthy lifestyle"
                    .to_string(),
            },
        );
        services.insert(
            "prp_facial".to_string(),
            ServiceInfo {
                display_name: "PRP Facial (Vampire Facial)".to_string(),
                duration_minutes: 90,
                price_range: "$700-$1200".to_string(),
                description: "Platelet-rich plasma therapy for skin rejuvenation".to_string(),
                prep_instructions: "Hydrate well, avoid alcohol 24 hours before".to_string(),
                aftercare: "No makeup for 24 hours, gentle skincare, avoid sun exposure"
                    .to_string(),
            },
        );
        services.insert(
            "consultation".to_string(),
            ServiceInfo {
                display_name: "Consultation".to_string(),
                duration_minutes: 30,
                price_range: "Complimentary".to_string(),
                description: "Free consultation with our expert providers".to_string(),
                prep_instructions: "Bring list of current medications and skincare products"
                    .to_string(),
                aftercare: "N/A".to_string(),
            },
        );

        let mut providers = HashMap::new();
        providers.insert(
            "dr_smith".to_string(),
            ProviderInfo {
                name: "Dr. Sarah Smith".to_string(),
                title: "Medical Director".to_string(),
                specialties: vec![
                    "Botox".to_string(),
                    "Dermal Fillers".to_string(),
                    "PRP Facial".to_string(),
                ],
                credentials: "MD, Board Certified Dermatologist".to_string(),
            },
        );
        providers.insert(
            "nurse_johnson".to_string(),
            ProviderInfo {
                name: "Nurse Emily Johnson".to_string(),
                title: "Nurse Injector".to_string(),
                specialties: vec![
                    "Botox".to_string(),
                    "Dermal Fillers".to_string(),
                    "Microneedling".to_string(),
                ],
                credentials: "RN, Certified Aesthetic Nurse".to_string(),
            },
        );
        providers.insert(
            "esthetician_lee".to_string(),
            ProviderInfo {
                name: "Lisa Lee".to_string(),
                title: "Lead Esthetician".to_string(),
                specialties: vec![
                    "HydraFacial".to_string(),
                    "Chemical Peel".to_string(),
                    "Laser Hair Removal".to_string(),
                ],
                credentials: "Licensed Esthetician, Laser Certified".to_string(),
            },
        );

        Self {
            services,
            providers,
        }
    }

    pub fn service(&self, service_type: &str) -> Option<&ServiceInfo> {
        self.services.get(service_type)
    }

    pub fn provider(&self, key: &str) -> Option<&ProviderInfo> {
        self.providers.get(key)
    }

    pub fn service_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.services.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderInfo> {
        self.providers.values()
    }

    /// Duration lookup with the catalog-wide 60 minute fallback.
    pub fn duration_minutes(&self, service_type: &str) -> i32 {
        self.services
            .get(service_type)
            .map(|s| s.duration_minutes)
            .unwrap_or(60)
    }

    /// Human display name, falling back to the raw key for unknown services.
    pub fn display_name(&self, service_type: &str) -> String {
        self.services
            .get(service_type)
            .map(|s| s.display_name.clone())
            .unwrap_or_else(|| service_type.to_string())
    }

    /// Resolve a free-text mention to a catalog key, matching either the key
    /// itself or the display name as a substring of the text.
    pub fn match_service_in_text(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let mut keys: Vec<&String> = self.services.keys().collect();
        keys.sort();
        for key in keys {
            let display = self.services[key].display_name.to_lowercase();
            if lowered.contains(&key.replace('_', " ")) || lowered.contains(key.as_str()) {
                return Some(key.clone());
            }
            if lowered.contains(&display) {
                return Some(key.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_contains_required_services() {
        let catalog = ServicesCatalog::standard();
        for key in [
            "botox",
            "dermal_fillers",
            "laser_hair_removal",
            "hydrafacial",
            "chemical_peel",
            "microneedling",
            "consultation",
        ] {
            assert!(catalog.service(key).is_some(), "missing service {}", key);
        }
    }

    #[test]
    fn duration_falls_back_to_sixty() {
        let catalog = ServicesCatalog::standard();
        assert_eq!(catalog.duration_minutes("botox"), 30);
        assert_eq!(catalog.duration_minutes("unknown_service"), 60);
    }

    #[test]
    fn matches_service_mentions_in_text() {
        let catalog = ServicesCatalog::standard();
        assert_eq!(
            catalog.match_service_in_text("I'd like Botox tomorrow"),
            Some("botox".to_string())
        );
        assert_eq!(
            catalog.match_service_in_text("book me laser hair removal please"),
            Some("laser_hair_removal".to_string())
        );
        assert_eq!(catalog.match_service_in_text("just saying hi"), None);
    }
}
