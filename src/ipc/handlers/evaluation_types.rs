use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
        })
}

fn handle_auto_weight(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed: Result<_, HandlerErr> = (|| {
        Ok((
            get_required_i64(&req.params, "courseId")?,
            get_required_i64(&req.params, "typeId")?,
        ))
    })();
    let (course_id, type_id) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(snapshot) = state.store.get(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    if !snapshot.evaluation_types.iter().any(|t| t.id == type_id) {
        return err(
            &req.id,
            "not_found",
            format!("evaluation type {} is not in course {}", type_id, course_id),
            None,
        );
    }
    ok(
        &req.id,
        json!({ "autoWeight": calc::auto_weight(&snapshot.evaluation_types, type_id) }),
    )
}

fn handle_effective_weights(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match get_required_i64(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(snapshot) = state.store.get(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    let weights = calc::effective_weights(&snapshot.evaluation_types);
    match serde_json::to_value(&weights) {
        Ok(weights) => ok(&req.id, json!({ "weights": weights })),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_max_weight(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed: Result<_, HandlerErr> = (|| {
        Ok((
            get_required_i64(&req.params, "courseId")?,
            get_required_i64(&req.params, "typeId")?,
        ))
    })();
    let (course_id, type_id) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(snapshot) = state.store.get(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    if !snapshot.evaluation_types.iter().any(|t| t.id == type_id) {
        return err(
            &req.id,
            "not_found",
            format!("evaluation type {} is not in course {}", type_id, course_id),
            None,
        );
    }
    ok(
        &req.id,
        json!({ "maxWeight": calc::max_weight(&snapshot.evaluation_types, type_id) }),
    )
}

fn handle_set_weight(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed: Result<_, HandlerErr> = (|| {
        Ok((
            get_required_i64(&req.params, "courseId")?,
            get_required_i64(&req.params, "typeId")?,
        ))
    })();
    let (course_id, type_id) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // weight: number sets, null/absent clears.
    let weight = match req.params.get("weight") {
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(w) => Some(w),
            None => return err(&req.id, "bad_params", "weight must be a number or null", None),
        },
        None => None,
    };

    let Some(snapshot) = state.store.get_mut(course_id) else {
        return err(&req.id, "no_course", format!("course {} not loaded", course_id), None);
    };
    match snapshot.set_type_weight(type_id, weight) {
        Ok(()) => ok(
            &req.id,
            json!({
                "typeId": type_id,
                "weight": weight,
            }),
        ),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "types.autoWeight" => Some(handle_auto_weight(state, req)),
        "types.effectiveWeights" => Some(handle_effective_weights(state, req)),
        "types.maxWeight" => Some(handle_max_weight(state, req)),
        "types.setWeight" => Some(handle_set_weight(state, req)),
        _ => None,
    }
}
